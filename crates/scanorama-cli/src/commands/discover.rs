//! `scanorama discover` — one-shot discovery sweeps.

use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;

use scanorama_core::config::AppConfig;
use scanorama_core::types::{DiscoveryMethod, Network};
use scanorama_engine::discovery::{DiscoveryEngine, DiscoveryRequest};
use scanorama_engine::targets;

use super::{build_discovery, connect_store};

#[derive(Args)]
pub struct DiscoverArgs {
    /// Ad-hoc CIDR to sweep (e.g. 192.168.1.0/24).
    #[arg(value_name = "CIDR")]
    pub cidr: Option<String>,

    /// Discover every active configured network.
    #[arg(long, conflicts_with = "cidr")]
    pub all_networks: bool,

    /// Alias of --all-networks.
    #[arg(long, conflicts_with = "cidr")]
    pub configured_networks: bool,

    /// Discover one configured network by name.
    #[arg(long = "network", conflicts_with = "cidr")]
    pub network_name: Option<String>,

    /// Probe method: ping, tcp, arp, icmp.
    #[arg(long)]
    pub method: Option<String>,

    /// Enable OS detection.
    #[arg(long)]
    pub detect_os: bool,

    /// Scanner timeout override in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Also store the ad-hoc CIDR as a configured network (requires --name).
    #[arg(long, requires = "name")]
    pub add: bool,

    /// Name for the stored network when --add is given.
    #[arg(long)]
    pub name: Option<String>,
}

pub async fn run(config: AppConfig, args: DiscoverArgs) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;
    let engine = build_discovery(&config, store.clone());

    let method = match &args.method {
        Some(raw) => raw.parse::<DiscoveryMethod>().map_err(anyhow::Error::msg)?,
        None => config.discovery.defaults.method,
    };
    let timeout_override = args.timeout.map(Duration::from_secs);

    if let Some(cidr) = &args.cidr {
        let normalized = targets::normalize_cidr(cidr)?;
        let network_id = if args.add {
            let name = args.name.as_deref().expect("clap enforces --name with --add");
            let network = store
                .upsert_network(name, &normalized, None, method, true)
                .await?;
            println!("stored network {name} ({normalized})");
            Some(network.id)
        } else {
            None
        };
        let request = DiscoveryRequest {
            network: normalized,
            network_id,
            method,
            detect_os: args.detect_os,
            timeout_override,
        };
        return sweep(&engine, &request).await;
    }

    if let Some(name) = &args.network_name {
        let network = store.get_network_by_name(name).await?;
        let request = request_for(&network, args.detect_os, timeout_override);
        return sweep(&engine, &request).await;
    }

    if args.all_networks || args.configured_networks {
        let networks: Vec<Network> = store
            .list_networks()
            .await?
            .into_iter()
            .filter(|n| n.is_active)
            .collect();
        if networks.is_empty() {
            anyhow::bail!("no active configured networks");
        }
        for network in &networks {
            let request = request_for(network, args.detect_os, timeout_override);
            if let Err(e) = sweep(&engine, &request).await {
                eprintln!("network {}: {e}", network.name);
            }
        }
        return Ok(());
    }

    anyhow::bail!("specify a CIDR, --network <name>, or --all-networks")
}

fn request_for(
    network: &Network,
    detect_os: bool,
    timeout_override: Option<Duration>,
) -> DiscoveryRequest {
    DiscoveryRequest {
        network: network.cidr.clone(),
        network_id: Some(network.id),
        method: network.discovery_method,
        detect_os,
        timeout_override,
    }
}

async fn sweep(engine: &DiscoveryEngine, request: &DiscoveryRequest) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let job = engine.discover(request, &cancel).await?;
    println!(
        "discovery {} on {}: {} discovered, {} responsive",
        job.id, job.network, job.hosts_discovered, job.hosts_responsive
    );
    Ok(())
}
