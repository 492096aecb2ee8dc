//! `scanorama scan` — one-shot port/service scan.

use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;

use scanorama_core::config::AppConfig;
use scanorama_core::types::{ScanType, TargetSelector};
use scanorama_engine::scan::ScanRequest;

use super::{build_orchestrator, connect_store};

#[derive(Args)]
pub struct ScanArgs {
    /// Explicit targets (IPs or CIDRs), comma separated.
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Scan all live hosts not flagged ignore_scanning.
    #[arg(long)]
    pub live_hosts: bool,

    /// Restrict --live-hosts to one OS family.
    #[arg(long)]
    pub os_family: Option<String>,

    /// Port specification: `22,80`, `8000-8100`, or `T:100`.
    #[arg(long)]
    pub ports: Option<String>,

    /// Scan type: connect, syn, version, comprehensive, aggressive, stealth.
    #[arg(long = "type")]
    pub scan_type: Option<String>,

    /// Named scan profile; overrides --type and --ports.
    #[arg(long)]
    pub profile: Option<String>,

    /// Scanner timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn run(config: AppConfig, args: ScanArgs) -> anyhow::Result<()> {
    let selector = if !args.targets.is_empty() {
        TargetSelector::Explicit {
            targets: args.targets.clone(),
        }
    } else if args.live_hosts {
        TargetSelector::LiveHosts {
            os_family: args.os_family.clone(),
        }
    } else {
        anyhow::bail!("specify --targets or --live-hosts");
    };

    let scan_type = match &args.scan_type {
        Some(raw) => raw.parse::<ScanType>().map_err(anyhow::Error::msg)?,
        None => config.scanning.default_scan_type,
    };
    if scan_type.requires_privileges() && !nix::unistd::geteuid().is_root() {
        eprintln!("warning: {scan_type} scans need raw-socket privileges; the scanner may refuse");
    }

    let store = connect_store(&config).await?;
    let orchestrator = build_orchestrator(&config, store);

    let request = ScanRequest {
        selector,
        scan_type,
        profile: args.profile,
        ports: args.ports,
        timeout: args.timeout.map(Duration::from_secs),
    };

    let cancel = CancellationToken::new();
    let outcome = orchestrator.run(&request, &cancel).await?;

    println!("scan {} completed", outcome.job.id);
    for host in &outcome.hosts {
        match &host.error {
            Some(error) => println!("  {}  FAILED: {error}", host.ip),
            None => {
                let open: Vec<String> = host
                    .observations
                    .iter()
                    .filter(|o| o.state == scanorama_core::types::PortState::Open)
                    .map(|o| match &o.service {
                        Some(service) => format!("{}/{} ({service})", o.port, o.protocol),
                        None => format!("{}/{}", o.port, o.protocol),
                    })
                    .collect();
                if open.is_empty() {
                    println!("  {}  no open ports", host.ip);
                } else {
                    println!("  {}  open: {}", host.ip, open.join(", "));
                }
            }
        }
    }
    Ok(())
}
