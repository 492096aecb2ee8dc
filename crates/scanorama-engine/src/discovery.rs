//! Discovery engine: turn a CIDR into live-host records.
//!
//! A run validates its input, creates a `DiscoveryJob` row, expands the
//! network through the exclusion-aware target generator, drives the external
//! scanner with resilience, and upserts every responsive host. Progress
//! observers read job state from the store and the event bus.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scanorama_core::config::DiscoveryConfig;
use scanorama_core::events::{EventPayload, ScanoramaEvent};
use scanorama_core::types::{DiscoveryJob, DiscoveryMethod, HostStatus};
use scanorama_store::Store;

use crate::error::{EngineError, Result};
use crate::nmap_xml::NmapRun;
use crate::pool::Job;
use crate::scanner::{NmapScanner, Resilience};
use crate::targets;
use crate::EventBus;

/// Parameters for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// CIDR to sweep.
    pub network: String,
    /// Set when the run belongs to a configured network; links exclusions
    /// and stats updates.
    pub network_id: Option<Uuid>,
    pub method: DiscoveryMethod,
    pub detect_os: bool,
    /// Replaces the computed timeout; still clamped to the configured ceiling.
    pub timeout_override: Option<Duration>,
}

/// One host record produced by a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRecord {
    pub ip: IpAddr,
    pub status: HostStatus,
    pub os_info: Option<String>,
    pub method: DiscoveryMethod,
    pub response_time: Option<Duration>,
}

pub struct DiscoveryEngine {
    scanner: Arc<NmapScanner>,
    store: Store,
    config: DiscoveryConfig,
    events: EventBus,
}

impl DiscoveryEngine {
    pub fn new(scanner: Arc<NmapScanner>, store: Store, config: DiscoveryConfig, events: EventBus) -> Self {
        Self {
            scanner,
            store,
            config,
            events,
        }
    }

    /// Execute a discovery run end to end. Validation failures surface
    /// before a job row exists; runtime failures transition the row to
    /// `failed` and are not retried at the job level.
    pub async fn discover(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryJob> {
        let cidr = targets::normalize_cidr(&request.network)
            .map_err(|_| EngineError::InvalidConfig(format!("invalid network: {:?}", request.network)))?;
        let net = targets::parse_cidr(&cidr)?;
        targets::check_network_size(&net, &self.config)?;

        let target_list = match request.network_id {
            Some(id) => targets::generate_for_network(&self.store, id, &self.config).await?,
            None => self.generate_adhoc(net).await?,
        };

        let job = self.store.create_discovery_job(&cidr, request.method).await?;
        self.store.mark_discovery_running(job.id).await?;
        self.publish(EventPayload::DiscoveryStarted {
            job_id: job.id,
            network: cidr.clone(),
            target_count: target_list.len(),
        });

        if target_list.is_empty() {
            tracing::info!(job_id = %job.id, network = %cidr, "No targets after exclusions");
            self.store.complete_discovery_job(job.id, 0, 0).await?;
            self.publish(EventPayload::DiscoveryCompleted {
                job_id: job.id,
                hosts_discovered: 0,
                hosts_responsive: 0,
            });
            return self.store.get_discovery_job(job.id).await.map_err(Into::into);
        }

        match self.sweep(&job, &target_list, request, cancel).await {
            Ok((discovered, responsive)) => {
                self.store
                    .complete_discovery_job(job.id, discovered, responsive)
                    .await?;
                if let Some(network_id) = request.network_id {
                    self.store
                        .record_network_discovery(network_id, discovered, responsive, Utc::now())
                        .await?;
                }
                self.publish(EventPayload::DiscoveryCompleted {
                    job_id: job.id,
                    hosts_discovered: discovered,
                    hosts_responsive: responsive,
                });
                metrics::counter!("scanorama_discovery_hosts_responsive_total")
                    .increment(responsive as u64);
                self.store.get_discovery_job(job.id).await.map_err(Into::into)
            }
            Err(e) => {
                self.store.fail_discovery_job(job.id, &e.to_string()).await?;
                self.publish(EventPayload::DiscoveryFailed {
                    job_id: job.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run the scanner and persist results; returns (discovered, responsive).
    async fn sweep(
        &self,
        job: &DiscoveryJob,
        target_list: &[IpAddr],
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<(i64, i64)> {
        let deadline = self.effective_timeout(target_list.len(), request.timeout_override);
        let flags = method_flags(request.method, request.detect_os);
        let target_args: Vec<String> = target_list.iter().map(|ip| ip.to_string()).collect();
        let resilience = Resilience::from_config(&self.config);

        tracing::info!(
            job_id = %job.id,
            network = %job.network,
            method = %request.method,
            targets = target_list.len(),
            deadline_secs = deadline.as_secs(),
            "Starting discovery sweep"
        );

        let run = self
            .scanner
            .run_with_resilience(&flags, &target_args, deadline, &resilience, cancel)
            .await?;

        let records = convert_results(&run, request.method);
        let discovered = records.len() as i64;
        let now = Utc::now();
        let mut responsive = 0i64;

        for record in &records {
            if record.status != HostStatus::Up {
                continue;
            }
            responsive += 1;
            let (os_family, os_name) = split_os_info(record.os_info.as_deref());
            self.store
                .upsert_host(
                    &record.ip.to_string(),
                    record.status,
                    record.method,
                    os_family,
                    os_name,
                    now,
                )
                .await?;
            self.publish(EventPayload::DiscoveryHostFound {
                job_id: job.id,
                ip: record.ip.to_string(),
            });
        }

        tracing::info!(
            job_id = %job.id,
            discovered,
            responsive,
            "Discovery sweep complete"
        );
        Ok((discovered, responsive))
    }

    /// Targets for an ad-hoc CIDR not tied to a stored network: only the
    /// global exclusions apply.
    async fn generate_adhoc(&self, net: ipnet::IpNet) -> Result<Vec<IpAddr>> {
        let mut exclusions = Vec::new();
        for row in self.store.list_exclusions(None).await? {
            if !row.enabled {
                continue;
            }
            if let Ok(excl) = row.excluded_cidr.parse() {
                exclusions.push(excl);
            }
        }
        Ok(targets::filter_targets(net, &exclusions, self.config.max_hosts))
    }

    /// `base × multiplier(target_count)`, clamped, unless overridden; an
    /// override is still subject to the configured ceiling.
    fn effective_timeout(&self, target_count: usize, user_override: Option<Duration>) -> Duration {
        let min = Duration::from_secs(self.config.min_timeout_secs);
        let max = Duration::from_secs(self.config.max_timeout_secs);
        let computed = match user_override {
            Some(t) => t,
            None => {
                Duration::from_secs(self.config.base_timeout_secs)
                    * timeout_multiplier(target_count)
            }
        };
        computed.clamp(min, max)
    }

    fn publish(&self, payload: EventPayload) {
        let _ = self.events.send(ScanoramaEvent::new(payload));
    }
}

/// Stepwise growth with target count.
fn timeout_multiplier(target_count: usize) -> u32 {
    match target_count {
        0..=16 => 1,
        17..=256 => 3,
        257..=1024 => 6,
        1025..=4096 => 12,
        _ => 24,
    }
}

/// Convert raw scanner output into discovery records. Hosts without an
/// address or with an unparseable one are skipped.
fn convert_results(run: &NmapRun, method: DiscoveryMethod) -> Vec<DiscoveryRecord> {
    run.hosts
        .iter()
        .filter_map(|host| {
            let ip: IpAddr = host.ip()?.parse().ok()?;
            let status = if host.is_up() {
                HostStatus::Up
            } else if host.is_down() {
                HostStatus::Down
            } else {
                HostStatus::Filtered
            };
            Some(DiscoveryRecord {
                ip,
                status,
                os_info: host.os_name().map(String::from),
                method,
                response_time: host.rtt_micros().map(Duration::from_micros),
            })
        })
        .collect()
}

/// Derive an OS family bucket from the scanner's match string.
pub(crate) fn split_os_info(os_info: Option<&str>) -> (Option<&str>, Option<&str>) {
    let Some(name) = os_info else {
        return (None, None);
    };
    let lower = name.to_lowercase();
    let family = if lower.contains("windows") {
        Some("windows")
    } else if lower.contains("linux") {
        Some("linux")
    } else if lower.contains("mac os") || lower.contains("macos") || lower.contains("darwin") {
        Some("macos")
    } else if lower.contains("bsd") {
        Some("bsd")
    } else {
        None
    };
    (family, Some(name))
}

fn method_flags(method: DiscoveryMethod, detect_os: bool) -> Vec<String> {
    let mut flags: Vec<String> = match method {
        DiscoveryMethod::Ping | DiscoveryMethod::Icmp => {
            vec!["-sn".into(), "-PE".into()]
        }
        DiscoveryMethod::Tcp => vec!["-sn".into(), "-PS22,80,443,3389".into()],
        DiscoveryMethod::Arp => vec!["-sn".into(), "-PR".into()],
    };
    if detect_os {
        flags.push("-O".into());
    }
    flags
}

// ── Worker-pool integration ───────────────────────────────────────

/// A discovery run packaged for the worker pool.
pub struct DiscoveryWorkItem {
    id: Uuid,
    engine: Arc<DiscoveryEngine>,
    request: DiscoveryRequest,
}

impl DiscoveryWorkItem {
    pub fn new(engine: Arc<DiscoveryEngine>, request: DiscoveryRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            request,
        }
    }
}

#[async_trait]
impl Job for DiscoveryWorkItem {
    fn id(&self) -> Uuid {
        self.id
    }

    fn job_type(&self) -> &'static str {
        "discovery"
    }

    async fn execute(&self, cancel: &CancellationToken) -> std::result::Result<(), EngineError> {
        self.engine.discover(&self.request, cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap_xml::parse_nmap_xml;

    #[test]
    fn multiplier_steps() {
        assert_eq!(timeout_multiplier(1), 1);
        assert_eq!(timeout_multiplier(16), 1);
        assert_eq!(timeout_multiplier(254), 3);
        assert_eq!(timeout_multiplier(1000), 6);
        assert_eq!(timeout_multiplier(4096), 12);
        assert_eq!(timeout_multiplier(10_000), 24);
    }

    #[test]
    fn os_family_buckets() {
        assert_eq!(split_os_info(Some("Microsoft Windows Server 2022")).0, Some("windows"));
        assert_eq!(split_os_info(Some("Linux 6.1")).0, Some("linux"));
        assert_eq!(split_os_info(Some("Apple macOS 14")).0, Some("macos"));
        assert_eq!(split_os_info(Some("OpenBSD 7.4")).0, Some("bsd"));
        assert_eq!(split_os_info(Some("Cisco IOS 15")).0, None);
        assert_eq!(split_os_info(None), (None, None));
    }

    #[test]
    fn conversion_skips_addressless_and_counts_down_hosts() {
        let xml = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap" args="nmap -sn 10.0.0.0/29">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="10.0.0.1" addrtype="ipv4"/>
  </host>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="AA:BB:CC:00:11:22" addrtype="mac"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.0.3" addrtype="ipv4"/>
  </host>
</nmaprun>"#;
        let run = parse_nmap_xml(xml.as_bytes()).unwrap();
        let records = convert_results(&run, DiscoveryMethod::Ping);

        // The MAC-only host is skipped entirely.
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.status == HostStatus::Up).count(), 1);
        assert_eq!(records.iter().filter(|r| r.status == HostStatus::Down).count(), 1);
    }

    #[test]
    fn method_flag_mapping() {
        assert_eq!(method_flags(DiscoveryMethod::Ping, false), vec!["-sn", "-PE"]);
        assert_eq!(method_flags(DiscoveryMethod::Icmp, false), vec!["-sn", "-PE"]);
        assert_eq!(
            method_flags(DiscoveryMethod::Tcp, false),
            vec!["-sn", "-PS22,80,443,3389"]
        );
        assert_eq!(method_flags(DiscoveryMethod::Arp, true), vec!["-sn", "-PR", "-O"]);
    }
}
