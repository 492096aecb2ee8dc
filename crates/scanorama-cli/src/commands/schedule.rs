//! `scanorama schedule` — cron-scheduled job management.

use clap::Subcommand;

use scanorama_core::config::AppConfig;
use scanorama_core::types::{DiscoveryMethod, ScanType, ScheduledJobType, TargetSelector};
use scanorama_engine::schedule::{parse_cron, DiscoveryJobConfig, ScanJobConfig};
use scanorama_engine::targets;

use super::{connect_store, time_cell};

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// List scheduled jobs.
    List,
    /// Schedule a recurring discovery of a CIDR or configured network.
    AddDiscovery {
        name: String,
        /// 5-field cron expression, e.g. "0 2 * * *".
        cron: String,
        /// CIDR or configured network name.
        network: String,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        detect_os: bool,
    },
    /// Schedule a recurring scan.
    AddScan {
        name: String,
        /// 5-field cron expression.
        cron: String,
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
        #[arg(long)]
        live_hosts: bool,
        #[arg(long)]
        os_family: Option<String>,
        #[arg(long)]
        ports: Option<String>,
        #[arg(long = "type")]
        scan_type: Option<String>,
        #[arg(long)]
        profile: Option<String>,
    },
    Remove { name: String },
    Show { name: String },
}

pub async fn run(config: AppConfig, action: ScheduleAction) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;

    match action {
        ScheduleAction::List => {
            let jobs = store.list_scheduled_jobs(false).await?;
            if jobs.is_empty() {
                println!("no scheduled jobs");
                return Ok(());
            }
            println!(
                "{:<20} {:<10} {:<16} {:<7} {:>5} {:<17}",
                "NAME", "TYPE", "CRON", "ACTIVE", "RUNS", "LAST RUN"
            );
            for j in &jobs {
                println!(
                    "{:<20} {:<10} {:<16} {:<7} {:>5} {:<17}",
                    j.name,
                    j.job_type,
                    j.cron_expression,
                    if j.is_active { "yes" } else { "no" },
                    j.run_count,
                    time_cell(j.last_run),
                );
            }
        }
        ScheduleAction::AddDiscovery {
            name,
            cron,
            network,
            method,
            detect_os,
        } => {
            parse_cron(&cron)?;
            // Accept a configured network name or a raw CIDR.
            let job_config = match store.get_network_by_name(&network).await {
                Ok(stored) => DiscoveryJobConfig {
                    network: stored.cidr,
                    network_id: Some(stored.id),
                    method: stored.discovery_method,
                    detect_os,
                },
                Err(_) => DiscoveryJobConfig {
                    network: targets::normalize_cidr(&network)?,
                    network_id: None,
                    method: match method {
                        Some(raw) => raw.parse::<DiscoveryMethod>().map_err(anyhow::Error::msg)?,
                        None => config.discovery.defaults.method,
                    },
                    detect_os,
                },
            };
            let job = store
                .create_scheduled_job(
                    &name,
                    ScheduledJobType::Discovery,
                    &cron,
                    serde_json::to_value(&job_config)?,
                )
                .await?;
            println!("scheduled discovery {} ({})", job.name, job.cron_expression);
        }
        ScheduleAction::AddScan {
            name,
            cron,
            targets: target_list,
            live_hosts,
            os_family,
            ports,
            scan_type,
            profile,
        } => {
            parse_cron(&cron)?;
            let selector = if !target_list.is_empty() {
                for t in &target_list {
                    targets::normalize_cidr(t)?;
                }
                TargetSelector::Explicit {
                    targets: target_list,
                }
            } else if live_hosts {
                TargetSelector::LiveHosts { os_family }
            } else {
                anyhow::bail!("specify --targets or --live-hosts");
            };
            let job_config = ScanJobConfig {
                selector,
                scan_type: match scan_type {
                    Some(raw) => raw.parse::<ScanType>().map_err(anyhow::Error::msg)?,
                    None => config.scanning.default_scan_type,
                },
                profile,
                ports,
            };
            let job = store
                .create_scheduled_job(
                    &name,
                    ScheduledJobType::Scan,
                    &cron,
                    serde_json::to_value(&job_config)?,
                )
                .await?;
            println!("scheduled scan {} ({})", job.name, job.cron_expression);
        }
        ScheduleAction::Remove { name } => {
            store.remove_scheduled_job(&name).await?;
            println!("removed schedule {name}");
        }
        ScheduleAction::Show { name } => {
            let j = store.get_scheduled_job(&name).await?;
            println!("name:       {}", j.name);
            println!("type:       {}", j.job_type);
            println!("cron:       {}", j.cron_expression);
            println!("active:     {}", j.is_active);
            println!("runs:       {}", j.run_count);
            println!("last run:   {}", time_cell(j.last_run));
            println!("config:     {}", serde_json::to_string_pretty(&j.configuration)?);
            if let Ok(schedule) = parse_cron(&j.cron_expression) {
                if let Some(next) = schedule.after(&chrono::Utc::now()).next() {
                    println!("next fire:  {}", next.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }
    }
    Ok(())
}
