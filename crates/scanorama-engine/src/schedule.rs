//! Cron-driven dispatch of stored discovery and scan jobs.
//!
//! Expressions are standard 5-field cron (`minute hour day month weekday`),
//! parsed strictly: an unparseable expression is rejected at creation and
//! skipped (with an error log) at dispatch. Overruns are suppressed: a
//! scheduled job is never enqueued twice concurrently.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scanorama_core::events::{EventPayload, ScanoramaEvent};
use scanorama_core::types::{
    DiscoveryMethod, ScanType, ScheduledJob, ScheduledJobType, TargetSelector,
};
use scanorama_store::Store;

use crate::discovery::{DiscoveryEngine, DiscoveryRequest, DiscoveryWorkItem};
use crate::error::{EngineError, Result};
use crate::pool::{Job, WorkerPool};
use crate::scan::{ScanOrchestrator, ScanRequest, ScanWorkItem};
use crate::EventBus;

/// Stored configuration of a scheduled discovery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJobConfig {
    pub network: String,
    #[serde(default)]
    pub network_id: Option<Uuid>,
    #[serde(default)]
    pub method: DiscoveryMethod,
    #[serde(default)]
    pub detect_os: bool,
}

/// Stored configuration of a scheduled scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobConfig {
    pub selector: TargetSelector,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub ports: Option<String>,
}

/// Parse a 5-field cron expression strictly.
///
/// The `cron` crate wants a seconds field, so one is prepended; anything
/// other than exactly five whitespace-separated fields is rejected before
/// parsing.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(EngineError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, found {fields}"),
        });
    }
    Schedule::from_str(&format!("0 {expr}")).map_err(|e| EngineError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a job should fire: its next fire time after the last run (or
/// creation) has passed.
fn is_due(job: &ScheduledJob, schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let reference = job.last_run.unwrap_or(job.created_at);
    match schedule.after(&reference).next() {
        Some(next) => next <= now,
        None => false,
    }
}

/// The scheduler: ticks, finds due jobs, and submits them to the pool.
pub struct Scheduler {
    store: Store,
    pool: Arc<WorkerPool>,
    discovery: Arc<DiscoveryEngine>,
    orchestrator: Arc<ScanOrchestrator>,
    events: EventBus,
    tick: Duration,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        pool: Arc<WorkerPool>,
        discovery: Arc<DiscoveryEngine>,
        orchestrator: Arc<ScanOrchestrator>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            pool,
            discovery,
            orchestrator,
            events,
            tick: Duration::from_secs(30),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until cancelled, dispatching due jobs on every tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(tick_secs = self.tick.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.dispatch_due(Utc::now()).await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }
    }

    /// One pass over active jobs.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let jobs = self.store.list_scheduled_jobs(true).await?;
        let mut dispatched = 0;

        for job in jobs {
            let schedule = match parse_cron(&job.cron_expression) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(schedule = %job.name, error = %e, "Skipping unparseable cron");
                    continue;
                }
            };
            if !is_due(&job, &schedule, now) {
                continue;
            }
            if !self.in_flight.lock().expect("in_flight lock").insert(job.id) {
                tracing::debug!(schedule = %job.name, "Previous run still executing; suppressed");
                continue;
            }

            match self.submit_job(&job) {
                Ok(work_id) => {
                    self.store.record_scheduled_run(job.id).await?;
                    let _ = self.events.send(ScanoramaEvent::new(
                        EventPayload::ScheduledJobDispatched {
                            schedule: job.name.clone(),
                            job_id: work_id,
                        },
                    ));
                    tracing::info!(schedule = %job.name, job_id = %work_id, "Dispatched scheduled job");
                    dispatched += 1;
                }
                Err(e) => {
                    self.in_flight.lock().expect("in_flight lock").remove(&job.id);
                    tracing::warn!(schedule = %job.name, error = %e, "Failed to submit scheduled job");
                }
            }
        }

        Ok(dispatched)
    }

    fn submit_job(&self, job: &ScheduledJob) -> Result<Uuid> {
        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            id: job.id,
        };

        let work: Box<dyn Job> = match job.job_type {
            ScheduledJobType::Discovery => {
                let config: DiscoveryJobConfig = serde_json::from_value(job.configuration.clone())
                    .map_err(|e| {
                        EngineError::InvalidConfig(format!(
                            "scheduled job {}: {e}",
                            job.name
                        ))
                    })?;
                let request = DiscoveryRequest {
                    network: config.network,
                    network_id: config.network_id,
                    method: config.method,
                    detect_os: config.detect_os,
                    timeout_override: None,
                };
                Box::new(TrackedJob {
                    inner: DiscoveryWorkItem::new(self.discovery.clone(), request),
                    _guard: guard,
                })
            }
            ScheduledJobType::Scan => {
                let config: ScanJobConfig = serde_json::from_value(job.configuration.clone())
                    .map_err(|e| {
                        EngineError::InvalidConfig(format!(
                            "scheduled job {}: {e}",
                            job.name
                        ))
                    })?;
                let request = ScanRequest {
                    selector: config.selector,
                    scan_type: config.scan_type,
                    profile: config.profile,
                    ports: config.ports,
                    timeout: None,
                };
                Box::new(TrackedJob {
                    inner: ScanWorkItem::new(self.orchestrator.clone(), request),
                    _guard: guard,
                })
            }
        };

        let work_id = work.id();
        self.pool.submit(work)?;
        Ok(work_id)
    }
}

/// Clears the scheduler's in-flight mark when the job (and its result) is
/// done with, restoring eligibility for the next fire.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

/// Wraps a work item so the in-flight guard lives exactly as long as the
/// job does inside the pool.
struct TrackedJob<J: Job> {
    inner: J,
    _guard: InFlightGuard,
}

#[async_trait]
impl<J: Job> Job for TrackedJob<J> {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn job_type(&self) -> &'static str {
        self.inner.job_type()
    }

    async fn execute(&self, cancel: &CancellationToken) -> std::result::Result<(), EngineError> {
        self.inner.execute(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scheduled(cron_expression: &str, last_run: Option<DateTime<Utc>>, created_at: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            job_type: ScheduledJobType::Discovery,
            cron_expression: cron_expression.to_string(),
            configuration: serde_json::json!({ "network": "10.0.0.0/24" }),
            is_active: true,
            last_run,
            run_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn five_field_expressions_parse() {
        assert!(parse_cron("0 2 * * *").is_ok());
        assert!(parse_cron("*/15 * * * *").is_ok());
        assert!(parse_cron("30 4 1 * 1-5").is_ok());
    }

    #[test]
    fn wrong_field_counts_rejected() {
        assert!(parse_cron("").is_err());
        assert!(parse_cron("* * * *").is_err());
        assert!(parse_cron("0 0 2 * * *").is_err());
        assert!(parse_cron("not a cron at all seven").is_err());
    }

    #[test]
    fn invalid_field_values_rejected() {
        assert!(parse_cron("99 2 * * *").is_err());
        assert!(parse_cron("0 25 * * *").is_err());
    }

    #[test]
    fn next_fire_is_computed_not_rounded() {
        let schedule = parse_cron("0 2 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = schedule.after(&after).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap());
    }

    #[test]
    fn due_when_next_fire_has_passed() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let schedule = parse_cron("0 2 * * *").unwrap();

        // Created before 02:00, now past it, never run: due.
        let job = scheduled("0 2 * * *", None, created);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        assert!(is_due(&job, &schedule, now));

        // Already ran today: not due again until tomorrow 02:00.
        let job = scheduled("0 2 * * *", Some(now), created);
        assert!(!is_due(&job, &schedule, Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap()));
        assert!(is_due(&job, &schedule, Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 1).unwrap()));
    }

    #[test]
    fn job_config_round_trips() {
        let config = ScanJobConfig {
            selector: TargetSelector::LiveHosts { os_family: None },
            scan_type: ScanType::Version,
            profile: None,
            ports: Some("22,80".to_string()),
        };
        let value = serde_json::to_value(&config).unwrap();
        let back: ScanJobConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.selector, config.selector);
        assert_eq!(back.ports, config.ports);
    }

    #[test]
    fn in_flight_guard_clears_on_drop() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let id = Uuid::new_v4();
        set.lock().unwrap().insert(id);
        {
            let _guard = InFlightGuard {
                set: set.clone(),
                id,
            };
        }
        assert!(set.lock().unwrap().is_empty());
    }
}
