//! Foreground server runtime: store, worker pool, engines, scheduler, and
//! the HTTP API wired together with signalled graceful shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use scanorama_api::ApiState;
use scanorama_core::config::AppConfig;
use scanorama_engine::discovery::DiscoveryEngine;
use scanorama_engine::scan::ScanOrchestrator;
use scanorama_engine::scanner::NmapScanner;
use scanorama_engine::schedule::Scheduler;
use scanorama_engine::{event_bus, targets, PoolConfig, WorkerPool};
use scanorama_store::Store;

use crate::daemon;

/// Run the server until SIGINT/SIGTERM; blocks the calling thread.
pub fn run_server(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    pid_file: Option<String>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.api.host = host;
    }
    if let Some(port) = port {
        config.api.port = port;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, pid_file))
}

async fn serve(config: AppConfig, pid_file: Option<String>) -> anyhow::Result<()> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("installing metrics recorder: {e}"))?;

    let store = Store::connect(&config.database).await?;
    store.migrate().await?;

    if config.discovery.auto_seed {
        targets::seed_from_config(&store, &config.discovery).await?;
    }
    store.seed_default_profiles().await?;

    let scanner = Arc::new(NmapScanner::new(&config.discovery.scanner_path));
    match scanner.verify_installation().await {
        Ok(version) => {
            tracing::info!(scanner_version = %version.lines().next().unwrap_or("").trim(), "Scanner verified")
        }
        Err(e) => tracing::warn!(error = %e, "Scanner unavailable; discovery and scans will fail"),
    }

    let events = event_bus();
    let pool = Arc::new(WorkerPool::new(PoolConfig::from(&config.scanning)));
    let discovery = Arc::new(DiscoveryEngine::new(
        scanner.clone(),
        store.clone(),
        config.discovery.clone(),
        events.clone(),
    ));
    let orchestrator = Arc::new(ScanOrchestrator::new(
        scanner,
        store.clone(),
        config.scanning.clone(),
        config.discovery.clone(),
        events.clone(),
    ));

    // Drain pool results so completions are logged even when nothing else
    // is watching the channel.
    if let Some(mut results) = pool.take_results() {
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                tracing::debug!(
                    job_id = %result.job_id,
                    job_type = result.job_type,
                    retries = result.retries,
                    success = result.error.is_none(),
                    "Pool result drained"
                );
            }
        });
    }

    let pid_path = pid_file.clone();
    if let Some(path) = &pid_path {
        daemon::write_pid_file(path)?;
    }

    let shutdown = CancellationToken::new();

    let scheduler = Scheduler::new(
        store.clone(),
        pool.clone(),
        discovery.clone(),
        orchestrator.clone(),
        events.clone(),
    );
    let scheduler_cancel = shutdown.child_token();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

    let state = ApiState::new(
        store,
        pool.clone(),
        discovery,
        orchestrator,
        events,
        config.api.clone(),
        config.scanning.clone(),
        metrics_handle,
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    let result = scanorama_api::serve(state, shutdown.clone()).await;

    // Wind down: scheduler first (no new dispatches), then drain the pool.
    shutdown.cancel();
    let _ = scheduler_handle.await;
    pool.shutdown().await;

    if let Some(path) = &pid_path {
        daemon::remove_pid_file(path);
    }

    tracing::info!("Server stopped");
    result.map_err(Into::into)
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
