//! One-shot CLI commands operating directly on the store and engine.

pub mod apikeys;
pub mod discover;
pub mod hosts;
pub mod networks;
pub mod profiles;
pub mod scan;
pub mod schedule;

use std::sync::Arc;

use scanorama_core::config::AppConfig;
use scanorama_engine::discovery::DiscoveryEngine;
use scanorama_engine::scan::ScanOrchestrator;
use scanorama_engine::scanner::NmapScanner;
use scanorama_engine::event_bus;
use scanorama_store::Store;

pub(crate) async fn connect_store(config: &AppConfig) -> anyhow::Result<Store> {
    let store = Store::connect(&config.database).await?;
    store.migrate().await?;
    Ok(store)
}

pub(crate) fn build_discovery(config: &AppConfig, store: Store) -> Arc<DiscoveryEngine> {
    let scanner = Arc::new(NmapScanner::new(&config.discovery.scanner_path));
    Arc::new(DiscoveryEngine::new(
        scanner,
        store,
        config.discovery.clone(),
        event_bus(),
    ))
}

pub(crate) fn build_orchestrator(config: &AppConfig, store: Store) -> Arc<ScanOrchestrator> {
    let scanner = Arc::new(NmapScanner::new(&config.discovery.scanner_path));
    Arc::new(ScanOrchestrator::new(
        scanner,
        store,
        config.scanning.clone(),
        config.discovery.clone(),
        event_bus(),
    ))
}

/// `-` placeholder for optional text cells in table output.
pub(crate) fn cell(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Render a nullable timestamp for table output.
pub(crate) fn time_cell(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
