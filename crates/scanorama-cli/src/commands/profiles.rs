//! `scanorama profiles` — inspect and exercise scan profiles.

use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use scanorama_core::config::AppConfig;
use scanorama_core::types::TargetSelector;
use scanorama_engine::scan::{PortSpec, ScanRequest};

use super::{build_orchestrator, cell, connect_store};

#[derive(Subcommand)]
pub enum ProfilesAction {
    /// List scan profiles.
    List,
    /// Show one profile.
    Show { name: String },
    /// Run a profile against a single target.
    Test {
        name: String,
        #[arg(long)]
        target: String,
        /// Validate and print what would run without scanning.
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn run(config: AppConfig, action: ProfilesAction) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;

    match action {
        ProfilesAction::List => {
            let profiles = store.list_profiles(false).await?;
            if profiles.is_empty() {
                println!("no scan profiles");
                return Ok(());
            }
            println!(
                "{:<18} {:<10} {:<14} {:<26} {:<7} {}",
                "NAME", "OS FAMILY", "TYPE", "PORTS", "TIMING", "ACTIVE"
            );
            for p in &profiles {
                println!(
                    "{:<18} {:<10} {:<14} {:<26} {:<7} {}",
                    p.name,
                    cell(p.os_family.as_deref()),
                    p.scan_type,
                    p.ports,
                    p.timing_level,
                    if p.is_active { "yes" } else { "no" },
                );
            }
        }
        ProfilesAction::Show { name } => {
            let p = store.get_profile(&name).await?;
            println!("name:       {}", p.name);
            println!("os family:  {}", cell(p.os_family.as_deref()));
            println!("scan type:  {}", p.scan_type);
            println!("ports:      {}", p.ports);
            println!("timing:     T{}", p.timing_level);
            println!("active:     {}", p.is_active);
            if !p.custom_scripts.is_empty() {
                println!("scripts:    {}", p.custom_scripts.join(", "));
            }
        }
        ProfilesAction::Test {
            name,
            target,
            dry_run,
        } => {
            let profile = store.get_profile(&name).await?;
            let spec = PortSpec::parse(&profile.ports)?;
            scanorama_engine::targets::normalize_cidr(&target)?;

            if dry_run {
                println!(
                    "profile {} would run a {} scan of {} against {target} at T{}",
                    profile.name,
                    profile.scan_type,
                    spec.as_spec_string(),
                    profile.timing_level
                );
                return Ok(());
            }

            let orchestrator = build_orchestrator(&config, store);
            let request = ScanRequest {
                selector: TargetSelector::Explicit {
                    targets: vec![target],
                },
                scan_type: profile.scan_type,
                profile: Some(profile.name.clone()),
                ports: None,
                timeout: None,
            };
            let outcome = orchestrator.run(&request, &CancellationToken::new()).await?;
            println!(
                "profile {} scanned {} host(s) (job {})",
                profile.name,
                outcome.hosts.len(),
                outcome.job.id
            );
        }
    }
    Ok(())
}
