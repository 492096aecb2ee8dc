//! `scanorama apikeys` — API key lifecycle.
//!
//! The clear key is printed exactly once, at creation. Listings only ever
//! show the display prefix and metadata.

use std::io::Write;

use chrono::Utc;
use clap::Subcommand;

use scanorama_core::config::AppConfig;
use scanorama_core::types::ApiKey;

use super::{cell, connect_store, time_cell};

#[derive(Subcommand)]
pub enum ApikeysAction {
    List {
        #[arg(long)]
        show_expired: bool,
        #[arg(long)]
        show_inactive: bool,
        /// table or json.
        #[arg(long, default_value = "table")]
        output: String,
    },
    Create {
        #[arg(long)]
        name: String,
        /// Relative expiry like 30d or 12h.
        #[arg(long)]
        expires_in: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show one key by id or prefix.
    Show { identifier: String },
    Update {
        identifier: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        expires_in: Option<String>,
    },
    /// Permanently disable a key.
    Revoke {
        identifier: String,
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(config: AppConfig, action: ApikeysAction) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;

    match action {
        ApikeysAction::List {
            show_expired,
            show_inactive,
            output,
        } => {
            let keys = store.list_api_keys(show_expired, show_inactive).await?;
            match output.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&keys)?),
                "table" => print_table(&keys),
                other => anyhow::bail!("unknown output format: {other} (use table or json)"),
            }
        }
        ApikeysAction::Create {
            name,
            expires_in,
            notes,
        } => {
            let expires_at = parse_expiry(expires_in.as_deref())?;
            let issued = store
                .create_api_key(&name, expires_at, notes.as_deref())
                .await?;
            println!("created API key {} ({})", issued.metadata.name, issued.metadata.id);
            println!();
            println!("  {}", issued.key);
            println!();
            println!("store this key now; it cannot be shown again.");
        }
        ApikeysAction::Show { identifier } => {
            let key = store.find_api_key(&identifier).await?;
            println!("id:         {}", key.id);
            println!("name:       {}", key.name);
            println!("prefix:     {}", key.key_prefix);
            println!("active:     {}", key.is_active);
            println!("expires:    {}", time_cell(key.expires_at));
            println!("last used:  {}", time_cell(key.last_used_at));
            println!("created:    {}", time_cell(Some(key.created_at)));
            println!("notes:      {}", cell(key.notes.as_deref()));
        }
        ApikeysAction::Update {
            identifier,
            name,
            notes,
            expires_in,
        } => {
            let key = store.find_api_key(&identifier).await?;
            let expires_at = parse_expiry(expires_in.as_deref())?;
            let updated = store
                .update_api_key(key.id, name.as_deref(), notes.as_deref(), expires_at)
                .await?;
            println!("updated {} ({})", updated.name, updated.id);
        }
        ApikeysAction::Revoke { identifier, force } => {
            let key = store.find_api_key(&identifier).await?;
            if !force && !confirm(&format!("revoke key {} ({})? this cannot be undone", key.name, key.key_prefix))? {
                println!("aborted");
                return Ok(());
            }
            store.revoke_api_key(key.id).await?;
            println!("revoked {} ({})", key.name, key.key_prefix);
        }
    }
    Ok(())
}

fn print_table(keys: &[ApiKey]) {
    if keys.is_empty() {
        println!("no API keys");
        return;
    }
    println!(
        "{:<38} {:<20} {:<10} {:<7} {:<17} {:<17}",
        "ID", "NAME", "PREFIX", "ACTIVE", "EXPIRES", "LAST USED"
    );
    for key in keys {
        println!(
            "{:<38} {:<20} {:<10} {:<7} {:<17} {:<17}",
            key.id,
            key.name,
            key.key_prefix,
            if key.is_active { "yes" } else { "no" },
            time_cell(key.expires_at),
            time_cell(key.last_used_at),
        );
    }
}

fn parse_expiry(raw: Option<&str>) -> anyhow::Result<Option<chrono::DateTime<Utc>>> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let window = scanorama_api::handlers::parse_window(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid --expires-in: {raw:?} (use e.g. 12h, 30d)"))?;
            Ok(Some(Utc::now() + window))
        }
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
