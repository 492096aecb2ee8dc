//! Scan orchestrator: port/service scans against a selected target set.
//!
//! Targets come from an explicit list, the live-host table, or a configured
//! network's generated addresses. Results are persisted per host; one
//! host's failure never discards another's observations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scanorama_core::config::{DiscoveryConfig, ScanningConfig};
use scanorama_core::events::{EventPayload, ScanoramaEvent};
use scanorama_core::types::{
    DiscoveryMethod, HostStatus, PortState, Protocol, ScanJob, ScanType, TargetSelector,
};
use scanorama_store::Store;

use crate::discovery::split_os_info;
use crate::error::{EngineError, Result};
use crate::pool::Job;
use crate::scanner::{NmapScanner, Resilience};
use crate::targets;
use crate::EventBus;

// ── Port specification ────────────────────────────────────────────

/// A validated port specification: comma-separated ports, hyphenated
/// ranges, or the top-ports shorthand `T:N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    TopPorts(u32),
    List(String),
}

impl PortSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidConfig("empty port specification".into()));
        }

        if let Some(count) = trimmed.strip_prefix("T:") {
            let n: u32 = count.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("invalid top-ports count: {count:?}"))
            })?;
            if n == 0 || n > 65_535 {
                return Err(EngineError::InvalidConfig(format!(
                    "top-ports count out of range: {n}"
                )));
            }
            return Ok(Self::TopPorts(n));
        }

        for token in trimmed.split(',') {
            let token = token.trim();
            match token.split_once('-') {
                Some((a, b)) => {
                    let lo = parse_port(a)?;
                    let hi = parse_port(b)?;
                    if lo > hi {
                        return Err(EngineError::InvalidConfig(format!(
                            "descending port range: {token}"
                        )));
                    }
                }
                None => {
                    parse_port(token)?;
                }
            }
        }
        Ok(Self::List(trimmed.to_string()))
    }

    pub fn to_nmap_args(&self) -> Vec<String> {
        match self {
            Self::TopPorts(n) => vec!["--top-ports".into(), n.to_string()],
            Self::List(spec) => vec!["-p".into(), spec.clone()],
        }
    }

    pub fn as_spec_string(&self) -> String {
        match self {
            Self::TopPorts(n) => format!("T:{n}"),
            Self::List(spec) => spec.clone(),
        }
    }
}

fn parse_port(token: &str) -> Result<u16> {
    let value: u32 = token
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("invalid port: {token:?}")))?;
    if value == 0 || value > 65_535 {
        return Err(EngineError::InvalidConfig(format!(
            "port out of range: {value}"
        )));
    }
    Ok(value as u16)
}

// ── Requests and outcomes ─────────────────────────────────────────

/// Parameters for one scan run. A named profile overrides type, ports, and
/// timing.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub selector: TargetSelector,
    pub scan_type: ScanType,
    pub profile: Option<String>,
    pub ports: Option<String>,
    pub timeout: Option<Duration>,
}

/// One port observed on one host.
#[derive(Debug, Clone)]
pub struct ObservedPort {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
}

/// Per-host scan outcome; a failed host carries its error here instead of
/// aborting the run.
#[derive(Debug, Clone)]
pub struct HostScanOutcome {
    pub ip: String,
    pub status: HostStatus,
    pub observations: Vec<ObservedPort>,
    pub error: Option<String>,
}

/// The full result of one scan run.
#[derive(Debug)]
pub struct ScanOutcome {
    pub job: ScanJob,
    pub hosts: Vec<HostScanOutcome>,
}

// ── Orchestrator ──────────────────────────────────────────────────

pub struct ScanOrchestrator {
    scanner: Arc<NmapScanner>,
    store: Store,
    scanning: ScanningConfig,
    discovery: DiscoveryConfig,
    events: EventBus,
}

impl ScanOrchestrator {
    pub fn new(
        scanner: Arc<NmapScanner>,
        store: Store,
        scanning: ScanningConfig,
        discovery: DiscoveryConfig,
        events: EventBus,
    ) -> Self {
        Self {
            scanner,
            store,
            scanning,
            discovery,
            events,
        }
    }

    /// Execute a scan end to end.
    ///
    /// The run succeeds if at least one host produced results; a run where
    /// every target failed transitions the job to `failed` and surfaces the
    /// last error, keeping whatever partial rows were written.
    pub async fn run(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        // Profile overrides type/ports/timing.
        let (scan_type, ports_text, timing) = match &request.profile {
            Some(name) => {
                let profile = self.store.get_profile(name).await?;
                (profile.scan_type, profile.ports.clone(), Some(profile.timing_level))
            }
            None => {
                let ports = request
                    .ports
                    .clone()
                    .unwrap_or_else(|| self.scanning.default_ports.clone());
                (request.scan_type, ports, None)
            }
        };
        let port_spec = PortSpec::parse(&ports_text)?;

        let job = self
            .store
            .create_scan_job(
                &request.selector,
                scan_type,
                request.profile.as_deref(),
                &port_spec.as_spec_string(),
            )
            .await?;

        let (target_args, network_id) = match self.resolve_targets(&request.selector).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.store.fail_scan_job(job.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        self.store.mark_scan_running(job.id).await?;
        self.publish(EventPayload::ScanStarted {
            job_id: job.id,
            target_count: target_args.len(),
        });

        let mut hosts: Vec<HostScanOutcome> = Vec::new();
        let mut last_error: Option<EngineError> = None;
        let flags = scan_flags(scan_type, timing, &port_spec);
        let deadline = request
            .timeout
            .unwrap_or(Duration::from_secs(self.discovery.base_timeout_secs) * 4)
            .clamp(
                Duration::from_secs(self.discovery.min_timeout_secs),
                Duration::from_secs(self.discovery.max_timeout_secs),
            );
        let resilience = Resilience::from_config(&self.discovery);
        let batch_size = self.scanning.max_concurrent_targets.max(1);

        for batch in target_args.chunks(batch_size) {
            if cancel.is_cancelled() {
                last_error = Some(EngineError::Cancelled);
                break;
            }
            match self
                .scanner
                .run_with_resilience(&flags, batch, deadline, &resilience, cancel)
                .await
            {
                Ok(run) => {
                    for host in &run.hosts {
                        let Some(ip) = host.ip() else { continue };
                        if !host.is_up() {
                            continue;
                        }
                        let outcome = self.persist_host(job.id, ip, host).await?;
                        self.publish(EventPayload::ScanHostCompleted {
                            job_id: job.id,
                            ip: ip.to_string(),
                            open_ports: outcome
                                .observations
                                .iter()
                                .filter(|o| o.state == PortState::Open)
                                .count(),
                        });
                        hosts.push(outcome);
                    }
                }
                Err(EngineError::Cancelled) => {
                    last_error = Some(EngineError::Cancelled);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        batch_size = batch.len(),
                        error = %e,
                        "Scan batch failed"
                    );
                    for target in batch {
                        hosts.push(HostScanOutcome {
                            ip: target.clone(),
                            status: HostStatus::Filtered,
                            observations: Vec::new(),
                            error: Some(e.to_string()),
                        });
                    }
                    last_error = Some(e);
                }
            }
        }

        let scanned = hosts.iter().filter(|h| h.error.is_none()).count();
        if scanned == 0 {
            let error = last_error
                .unwrap_or_else(|| EngineError::TargetInvalid("no targets produced results".into()));
            self.store.fail_scan_job(job.id, &error.to_string()).await?;
            self.publish(EventPayload::ScanFailed {
                job_id: job.id,
                error: error.to_string(),
            });
            return Err(error);
        }

        if let Some(network_id) = network_id {
            self.store.record_network_scan(network_id, Utc::now()).await?;
        }
        self.store.complete_scan_job(job.id).await?;
        self.publish(EventPayload::ScanCompleted {
            job_id: job.id,
            hosts_scanned: scanned,
        });
        metrics::counter!("scanorama_scan_hosts_total").increment(scanned as u64);

        let job = self.store.get_scan_job(job.id).await?;
        Ok(ScanOutcome { job, hosts })
    }

    /// Expand the selector into scanner target arguments, plus the owning
    /// network id when one exists.
    async fn resolve_targets(
        &self,
        selector: &TargetSelector,
    ) -> Result<(Vec<String>, Option<Uuid>)> {
        match selector {
            TargetSelector::Explicit { targets: list } => {
                if list.is_empty() {
                    return Err(EngineError::TargetInvalid("empty target list".into()));
                }
                let mut validated = Vec::with_capacity(list.len());
                for raw in list {
                    // Accept bare IPs and CIDRs; nmap expands CIDRs itself.
                    targets::normalize_cidr(raw)?;
                    validated.push(raw.trim().to_string());
                }
                Ok((validated, None))
            }
            TargetSelector::LiveHosts { os_family } => {
                let hosts = self.store.live_hosts(os_family.as_deref()).await?;
                if hosts.is_empty() {
                    return Err(EngineError::TargetInvalid(
                        "no live hosts match the filter".into(),
                    ));
                }
                Ok((hosts.into_iter().map(|h| h.ip_address).collect(), None))
            }
            TargetSelector::Network { name } => {
                let network = self.store.get_network_by_name(name).await?;
                let targets =
                    targets::generate_for_network(&self.store, network.id, &self.discovery).await?;
                if targets.is_empty() {
                    return Err(EngineError::TargetInvalid(format!(
                        "network {name} has no targets after exclusions"
                    )));
                }
                Ok((
                    targets.into_iter().map(|ip| ip.to_string()).collect(),
                    Some(network.id),
                ))
            }
        }
    }

    /// Upsert the host and insert this run's observations.
    async fn persist_host(
        &self,
        job_id: Uuid,
        ip: &str,
        host: &crate::nmap_xml::NmapHost,
    ) -> Result<HostScanOutcome> {
        let now = Utc::now();
        let (os_family, os_name) = split_os_info(host.os_name());
        let stored = self
            .store
            .upsert_host(ip, HostStatus::Up, DiscoveryMethod::Tcp, os_family, os_name, now)
            .await?;

        let observations: Vec<ObservedPort> = host
            .ports
            .iter()
            .flat_map(|p| p.ports.iter())
            .filter_map(|p| {
                let protocol: Protocol = p.protocol.parse().ok()?;
                let state = p.state.state.parse().unwrap_or(PortState::Filtered);
                Some(ObservedPort {
                    port: p.port_id,
                    protocol,
                    state,
                    service: p.service.as_ref().map(|s| s.name.clone()),
                    version: p.service.as_ref().and_then(|s| {
                        match (&s.product, &s.version) {
                            (Some(product), Some(version)) => Some(format!("{product} {version}")),
                            (Some(product), None) => Some(product.clone()),
                            (None, Some(version)) => Some(version.clone()),
                            (None, None) => None,
                        }
                    }),
                })
            })
            .collect();

        let rows: Vec<_> = observations
            .iter()
            .map(|o| (o.port, o.protocol, o.state, o.service.clone(), o.version.clone()))
            .collect();
        self.store
            .insert_port_observations(stored.id, Some(job_id), &rows, now)
            .await?;

        metrics::counter!("scanorama_scan_ports_observed_total")
            .increment(observations.len() as u64);

        Ok(HostScanOutcome {
            ip: ip.to_string(),
            status: HostStatus::Up,
            observations,
            error: None,
        })
    }

    fn publish(&self, payload: EventPayload) {
        let _ = self.events.send(ScanoramaEvent::new(payload));
    }
}

fn scan_flags(scan_type: ScanType, timing: Option<i16>, ports: &PortSpec) -> Vec<String> {
    let mut flags: Vec<String> = match scan_type {
        ScanType::Connect => vec!["-sT".into()],
        ScanType::Syn => vec!["-sS".into()],
        ScanType::Version => vec!["-sV".into()],
        ScanType::Comprehensive => vec!["-sS".into(), "-sV".into(), "-O".into(), "-A".into()],
        ScanType::Aggressive => vec!["-A".into(), "-T4".into()],
        ScanType::Stealth => vec!["-sS".into(), "-T2".into()],
    };
    if let Some(level) = timing {
        if !flags.iter().any(|f| f.starts_with("-T")) {
            flags.push(format!("-T{level}"));
        }
    }
    flags.extend(ports.to_nmap_args());
    flags
}

// ── Worker-pool integration ───────────────────────────────────────

/// A scan run packaged for the worker pool.
pub struct ScanWorkItem {
    id: Uuid,
    orchestrator: Arc<ScanOrchestrator>,
    request: ScanRequest,
}

impl ScanWorkItem {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, request: ScanRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            orchestrator,
            request,
        }
    }
}

#[async_trait]
impl Job for ScanWorkItem {
    fn id(&self) -> Uuid {
        self.id
    }

    fn job_type(&self) -> &'static str {
        "scan"
    }

    async fn execute(&self, cancel: &CancellationToken) -> std::result::Result<(), EngineError> {
        self.orchestrator.run(&self.request, cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_accepts_lists_ranges_and_top_ports() {
        assert_eq!(
            PortSpec::parse("22,80,443").unwrap(),
            PortSpec::List("22,80,443".into())
        );
        assert_eq!(
            PortSpec::parse("8000-8100").unwrap(),
            PortSpec::List("8000-8100".into())
        );
        assert_eq!(
            PortSpec::parse("22,8000-8100,443").unwrap(),
            PortSpec::List("22,8000-8100,443".into())
        );
        assert_eq!(PortSpec::parse("T:100").unwrap(), PortSpec::TopPorts(100));
    }

    #[test]
    fn port_spec_boundaries() {
        assert!(PortSpec::parse("1,65535").is_ok());
        assert!(PortSpec::parse("0").is_err());
        assert!(PortSpec::parse("65536").is_err());
        assert!(PortSpec::parse("443-80").is_err());
        assert!(PortSpec::parse("").is_err());
        assert!(PortSpec::parse("http").is_err());
        assert!(PortSpec::parse("T:0").is_err());
        assert!(PortSpec::parse("T:70000").is_err());
    }

    #[test]
    fn port_spec_nmap_args() {
        assert_eq!(
            PortSpec::TopPorts(100).to_nmap_args(),
            vec!["--top-ports", "100"]
        );
        assert_eq!(
            PortSpec::List("22,80".into()).to_nmap_args(),
            vec!["-p", "22,80"]
        );
    }

    #[test]
    fn scan_flag_mapping() {
        let ports = PortSpec::List("22".into());
        assert_eq!(scan_flags(ScanType::Connect, None, &ports), vec!["-sT", "-p", "22"]);
        assert_eq!(scan_flags(ScanType::Syn, None, &ports), vec!["-sS", "-p", "22"]);
        assert_eq!(
            scan_flags(ScanType::Comprehensive, None, &ports),
            vec!["-sS", "-sV", "-O", "-A", "-p", "22"]
        );
        // Profile timing is applied when the type carries none.
        assert_eq!(
            scan_flags(ScanType::Version, Some(4), &ports),
            vec!["-sV", "-T4", "-p", "22"]
        );
        // But never duplicated.
        assert_eq!(
            scan_flags(ScanType::Stealth, Some(4), &ports),
            vec!["-sS", "-T2", "-p", "22"]
        );
    }
}
