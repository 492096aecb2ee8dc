//! Core domain entities for Scanorama.
//!
//! These types are shared by the store, the engine, the HTTP API, and the
//! CLI. Database mapping lives in scanorama-store; everything here is plain
//! serde-serializable Rust.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Enums ─────────────────────────────────────────────────────────

/// How live hosts are probed during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// ICMP echo sweep.
    #[default]
    Ping,
    /// TCP connect probe against a small canonical port set.
    Tcp,
    /// Link-layer ARP; only meaningful on local segments.
    Arp,
    /// Alias for ping.
    Icmp,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Tcp => "tcp",
            Self::Arp => "arp",
            Self::Icmp => "icmp",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Self::Ping),
            "tcp" => Ok(Self::Tcp),
            "arp" => Ok(Self::Arp),
            "icmp" => Ok(Self::Icmp),
            other => Err(format!("unknown discovery method: {other}")),
        }
    }
}

/// Observed host liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Down,
    Filtered,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "filtered" => Ok(Self::Filtered),
            other => Err(format!("unknown host status: {other}")),
        }
    }
}

/// Transport protocol of a port observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// State of a scanned port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "filtered" => Ok(Self::Filtered),
            other => Err(format!("unknown port state: {other}")),
        }
    }
}

/// Lifecycle of a discovery or scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What kind of work a scheduled job dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledJobType {
    Discovery,
    Scan,
}

impl ScheduledJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Scan => "scan",
        }
    }
}

impl fmt::Display for ScheduledJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledJobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "scan" => Ok(Self::Scan),
            other => Err(format!("unknown scheduled job type: {other}")),
        }
    }
}

/// Port-scan strategy. `Syn` requires elevated privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[default]
    Connect,
    Syn,
    Version,
    Comprehensive,
    Aggressive,
    Stealth,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Syn => "syn",
            Self::Version => "version",
            Self::Comprehensive => "comprehensive",
            Self::Aggressive => "aggressive",
            Self::Stealth => "stealth",
        }
    }

    /// SYN scans need raw-socket capability.
    pub fn requires_privileges(&self) -> bool {
        matches!(self, Self::Syn | Self::Comprehensive | Self::Stealth)
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "syn" => Ok(Self::Syn),
            "version" => Ok(Self::Version),
            "comprehensive" => Ok(Self::Comprehensive),
            "aggressive" => Ok(Self::Aggressive),
            "stealth" => Ok(Self::Stealth),
            other => Err(format!("unknown scan type: {other}")),
        }
    }
}

// ── Networks & exclusions ─────────────────────────────────────────

/// A configured address range under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub name: String,
    pub cidr: String,
    pub description: Option<String>,
    pub discovery_method: DiscoveryMethod,
    pub is_active: bool,
    pub scan_enabled: bool,
    pub last_discovery: Option<DateTime<Utc>>,
    pub last_scan: Option<DateTime<Utc>>,
    pub host_count: i64,
    pub active_host_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An address range excluded from discovery and scanning.
///
/// `network_id = None` denotes a global exclusion applying to every network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkExclusion {
    pub id: Uuid,
    pub network_id: Option<Uuid>,
    pub excluded_cidr: String,
    pub reason: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl NetworkExclusion {
    pub fn is_global(&self) -> bool {
        self.network_id.is_none()
    }
}

// ── Hosts & ports ─────────────────────────────────────────────────

/// A host observed on the network. Lifecycle is independent of jobs: the
/// record persists across discovery and scan runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub ip_address: String,
    pub status: HostStatus,
    pub os_family: Option<String>,
    pub os_name: Option<String>,
    pub discovery_method: DiscoveryMethod,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ignore_scanning: bool,
}

/// One (host, port, protocol) observation from a scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortObservation {
    pub id: Uuid,
    pub host_id: Uuid,
    pub scan_job_id: Option<Uuid>,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
    pub observed_at: DateTime<Utc>,
}

// ── Jobs ──────────────────────────────────────────────────────────

/// A single discovery run over one CIDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub id: Uuid,
    pub network: String,
    pub method: DiscoveryMethod,
    pub status: JobStatus,
    pub hosts_discovered: i64,
    pub hosts_responsive: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a scan job selects its targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetSelector {
    /// Explicit IP/CIDR list from the caller.
    Explicit { targets: Vec<String> },
    /// All hosts with `status = up` and `ignore_scanning = false`,
    /// optionally restricted to one OS family.
    LiveHosts { os_family: Option<String> },
    /// Generated addresses of a configured network.
    Network { name: String },
}

/// A single port/service scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub target_selector: TargetSelector,
    pub scan_type: ScanType,
    pub profile: Option<String>,
    pub ports: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A cron-driven recurring job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub job_type: ScheduledJobType,
    pub cron_expression: String,
    pub configuration: serde_json::Value,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named bundle of scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProfile {
    pub id: Uuid,
    pub name: String,
    pub os_family: Option<String>,
    pub scan_type: ScanType,
    pub ports: String,
    pub timing_level: i16,
    pub is_active: bool,
    pub custom_scripts: Vec<String>,
}

// ── API keys ──────────────────────────────────────────────────────

/// Stored API key material. The clear-text key exists only in the
/// [`IssuedKey`] returned at creation; this row never contains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// An expired or inactive key never authenticates.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// The one-time creation response: clear key plus stored metadata.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub key: String,
    pub metadata: ApiKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips() {
        for m in ["ping", "tcp", "arp", "icmp"] {
            assert_eq!(m.parse::<DiscoveryMethod>().unwrap().as_str(), m);
        }
        for s in ["up", "down", "filtered"] {
            assert_eq!(s.parse::<HostStatus>().unwrap().as_str(), s);
        }
        for s in ["pending", "running", "completed", "failed"] {
            assert_eq!(s.parse::<JobStatus>().unwrap().as_str(), s);
        }
        assert!("teleport".parse::<DiscoveryMethod>().is_err());
    }

    #[test]
    fn scan_type_privileges() {
        assert!(ScanType::Syn.requires_privileges());
        assert!(ScanType::Stealth.requires_privileges());
        assert!(!ScanType::Connect.requires_privileges());
        assert!(!ScanType::Version.requires_privileges());
    }

    #[test]
    fn target_selector_serialization() {
        let sel = TargetSelector::LiveHosts {
            os_family: Some("linux".to_string()),
        };
        let json = serde_json::to_string(&sel).unwrap();
        assert!(json.contains("\"mode\":\"live_hosts\""));
        let back: TargetSelector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);

        let sel = TargetSelector::Network {
            name: "corp-lan".to_string(),
        };
        let json = serde_json::to_string(&sel).unwrap();
        let back: TargetSelector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);
    }

    #[test]
    fn api_key_usability() {
        let now = Utc::now();
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            key_prefix: "sk_abcde".to_string(),
            key_hash: "deadbeef".to_string(),
            is_active: true,
            expires_at: None,
            last_used_at: None,
            notes: None,
            created_at: now,
        };
        assert!(key.is_usable(now));

        key.expires_at = Some(now - chrono::Duration::hours(1));
        assert!(!key.is_usable(now));

        key.expires_at = None;
        key.is_active = false;
        assert!(!key.is_usable(now));
    }

    #[test]
    fn api_key_hash_never_serialized() {
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            key_prefix: "sk_abcde".to_string(),
            key_hash: "supersecret".to_string(),
            is_active: true,
            expires_at: None,
            last_used_at: None,
            notes: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("supersecret"));
        assert!(json.contains("sk_abcde"));
    }
}
