//! `scanorama networks` — configured networks and exclusions.

use clap::Subcommand;
use uuid::Uuid;

use scanorama_core::config::AppConfig;
use scanorama_core::types::DiscoveryMethod;
use scanorama_engine::targets;
use scanorama_store::Store;

use super::{cell, connect_store, time_cell};

#[derive(Subcommand)]
pub enum NetworksAction {
    /// List configured networks.
    List,
    /// Add or update a network.
    Add {
        name: String,
        cidr: String,
        #[arg(long)]
        description: Option<String>,
        /// ping, tcp, arp, icmp.
        #[arg(long)]
        method: Option<String>,
    },
    /// Remove a network (its exclusions go with it).
    Remove { name: String },
    /// Show one network with its exclusions.
    Show { name: String },
    Enable { name: String },
    Disable { name: String },
    Rename { name: String, new_name: String },
    /// Aggregate host counts across the store.
    Stats,
    /// Manage exclusions.
    Exclusions {
        #[command(subcommand)]
        action: ExclusionsAction,
    },
}

#[derive(Subcommand)]
pub enum ExclusionsAction {
    /// List exclusions: global by default, one network's with --network.
    List {
        #[arg(long)]
        network: Option<String>,
    },
    /// Add an exclusion: global by default, network-scoped with --network.
    Add {
        cidr: String,
        #[arg(long)]
        network: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove an exclusion by id.
    Remove { id: Uuid },
}

pub async fn run(config: AppConfig, action: NetworksAction) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;

    match action {
        NetworksAction::List => {
            let networks = store.list_networks().await?;
            if networks.is_empty() {
                println!("no configured networks");
                return Ok(());
            }
            println!(
                "{:<20} {:<20} {:<7} {:<7} {:>6} {:>7} {:<17}",
                "NAME", "CIDR", "METHOD", "ACTIVE", "HOSTS", "UP", "LAST DISCOVERY"
            );
            for n in &networks {
                println!(
                    "{:<20} {:<20} {:<7} {:<7} {:>6} {:>7} {:<17}",
                    n.name,
                    n.cidr,
                    n.discovery_method,
                    if n.is_active { "yes" } else { "no" },
                    n.host_count,
                    n.active_host_count,
                    time_cell(n.last_discovery),
                );
            }
        }
        NetworksAction::Add {
            name,
            cidr,
            description,
            method,
        } => {
            let cidr = targets::normalize_cidr(&cidr)?;
            let method = match method {
                Some(raw) => raw.parse::<DiscoveryMethod>().map_err(anyhow::Error::msg)?,
                None => config.discovery.defaults.method,
            };
            let network = store
                .upsert_network(&name, &cidr, description.as_deref(), method, true)
                .await?;
            println!("stored network {} ({})", network.name, network.cidr);
        }
        NetworksAction::Remove { name } => {
            store.delete_network(&name).await?;
            println!("removed network {name}");
        }
        NetworksAction::Show { name } => {
            let network = store.get_network_by_name(&name).await?;
            println!("name:            {}", network.name);
            println!("cidr:            {}", network.cidr);
            println!("description:     {}", cell(network.description.as_deref()));
            println!("method:          {}", network.discovery_method);
            println!("active:          {}", network.is_active);
            println!("scan enabled:    {}", network.scan_enabled);
            println!("hosts:           {} ({} up)", network.host_count, network.active_host_count);
            println!("last discovery:  {}", time_cell(network.last_discovery));
            println!("last scan:       {}", time_cell(network.last_scan));

            let exclusions = store.list_exclusions(Some(network.id)).await?;
            if !exclusions.is_empty() {
                println!("exclusions:");
                for e in &exclusions {
                    println!(
                        "  {}  {}  {}",
                        e.id,
                        e.excluded_cidr,
                        cell(e.reason.as_deref())
                    );
                }
            }
        }
        NetworksAction::Enable { name } => {
            store.set_network_active(&name, true).await?;
            println!("enabled {name}");
        }
        NetworksAction::Disable { name } => {
            store.set_network_active(&name, false).await?;
            println!("disabled {name}");
        }
        NetworksAction::Rename { name, new_name } => {
            store.rename_network(&name, &new_name).await?;
            println!("renamed {name} to {new_name}");
        }
        NetworksAction::Stats => {
            let (total, up) = store.host_counts().await?;
            let networks = store.list_networks().await?;
            println!("networks: {}", networks.len());
            println!("hosts:    {total} ({up} up)");
        }
        NetworksAction::Exclusions { action } => exclusions(&store, action).await?,
    }
    Ok(())
}

async fn exclusions(store: &Store, action: ExclusionsAction) -> anyhow::Result<()> {
    match action {
        ExclusionsAction::List { network } => {
            let network_id = match network {
                Some(name) => Some(store.get_network_by_name(&name).await?.id),
                None => None,
            };
            let rows = store.list_exclusions(network_id).await?;
            if rows.is_empty() {
                println!("no exclusions");
                return Ok(());
            }
            for e in &rows {
                println!(
                    "{}  {:<20} {:<8} {}",
                    e.id,
                    e.excluded_cidr,
                    if e.enabled { "enabled" } else { "disabled" },
                    cell(e.reason.as_deref()),
                );
            }
        }
        ExclusionsAction::Add {
            cidr,
            network,
            reason,
        } => {
            let cidr = targets::normalize_cidr(&cidr)?;
            let network_id = match network {
                Some(name) => Some(store.get_network_by_name(&name).await?.id),
                None => None,
            };
            let row = store
                .add_exclusion(network_id, &cidr, reason.as_deref())
                .await?;
            let scope = if row.is_global() { "global" } else { "network" };
            println!("added {scope} exclusion {} ({})", row.excluded_cidr, row.id);
        }
        ExclusionsAction::Remove { id } => {
            store.remove_exclusion(id).await?;
            println!("removed exclusion {id}");
        }
    }
    Ok(())
}
