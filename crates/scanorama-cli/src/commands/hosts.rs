//! `scanorama hosts` — host listings and ignore flags.

use clap::{Args, Subcommand};

use scanorama_core::config::AppConfig;
use scanorama_core::types::HostStatus;
use scanorama_store::HostFilter;

use super::{cell, connect_store};

#[derive(Args)]
pub struct HostsArgs {
    #[command(subcommand)]
    pub action: Option<HostsAction>,

    /// Filter by status: up, down, filtered.
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by OS family (e.g. linux, windows).
    #[arg(long)]
    pub os: Option<String>,

    /// Only hosts seen within a window: 1h, 24h, 7d.
    #[arg(long)]
    pub last_seen: Option<String>,

    /// Include hosts flagged ignore_scanning.
    #[arg(long)]
    pub show_ignored: bool,
}

#[derive(Subcommand)]
pub enum HostsAction {
    /// Exclude a host from automatic scans (it stays visible).
    Ignore { ip: String },
    /// Re-include a previously ignored host.
    Unignore { ip: String },
}

pub async fn run(config: AppConfig, args: HostsArgs) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;

    match args.action {
        Some(HostsAction::Ignore { ip }) => {
            store.set_ignore_scanning(&ip, true).await?;
            println!("{ip} will be skipped by automatic scans");
            Ok(())
        }
        Some(HostsAction::Unignore { ip }) => {
            store.set_ignore_scanning(&ip, false).await?;
            println!("{ip} re-enabled for automatic scans");
            Ok(())
        }
        None => list(&store, &args).await,
    }
}

async fn list(store: &scanorama_store::Store, args: &HostsArgs) -> anyhow::Result<()> {
    let status = match &args.status {
        Some(raw) => Some(raw.parse::<HostStatus>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let last_seen_within = match &args.last_seen {
        Some(raw) => Some(
            scanorama_api::handlers::parse_window(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid --last-seen window: {raw:?}"))?,
        ),
        None => None,
    };

    let hosts = store
        .list_hosts(&HostFilter {
            status,
            os_family: args.os.clone(),
            last_seen_within,
            show_ignored: args.show_ignored,
        })
        .await?;

    if hosts.is_empty() {
        println!("no hosts match");
        return Ok(());
    }

    println!(
        "{:<40} {:<9} {:<10} {:<18} {:<17} {}",
        "IP", "STATUS", "METHOD", "OS", "LAST SEEN", "IGNORED"
    );
    for host in &hosts {
        println!(
            "{:<40} {:<9} {:<10} {:<18} {:<17} {}",
            host.ip_address,
            host.status,
            host.discovery_method,
            cell(host.os_name.as_deref()),
            host.last_seen.format("%Y-%m-%d %H:%M"),
            if host.ignore_scanning { "yes" } else { "" }
        );
    }
    println!("{} host(s)", hosts.len());
    Ok(())
}
