//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use scanorama_core::config::{ApiConfig, ScanningConfig};
use scanorama_engine::discovery::DiscoveryEngine;
use scanorama_engine::scan::ScanOrchestrator;
use scanorama_engine::{EventBus, WorkerPool};
use scanorama_store::Store;

use crate::auth::{self, KeyLimiter};
use crate::{handlers, ws};

/// Everything handlers need, shared behind an `Arc`.
pub struct ApiState {
    pub store: Store,
    pub pool: Arc<WorkerPool>,
    pub discovery: Arc<DiscoveryEngine>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub events: EventBus,
    pub config: ApiConfig,
    pub scanning: ScanningConfig,
    pub metrics: PrometheusHandle,
    pub started_at: DateTime<Utc>,
    pub limiter: Option<Arc<KeyLimiter>>,
}

pub type SharedState = Arc<ApiState>;

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        pool: Arc<WorkerPool>,
        discovery: Arc<DiscoveryEngine>,
        orchestrator: Arc<ScanOrchestrator>,
        events: EventBus,
        config: ApiConfig,
        scanning: ScanningConfig,
        metrics: PrometheusHandle,
    ) -> SharedState {
        let limiter = if config.rate_limit_enabled {
            auth::build_limiter(config.rate_limit_per_minute)
        } else {
            None
        };
        Arc::new(Self {
            store,
            pool,
            discovery,
            orchestrator,
            events,
            config,
            scanning,
            metrics,
            started_at: Utc::now(),
            limiter,
        })
    }
}

/// Build the `/api/v1` router.
///
/// Health, liveness, and the Prometheus exposition are unauthenticated so
/// probes and scrapers work without key material; everything else goes
/// through the auth + rate-limit middleware.
pub fn build_router(state: SharedState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/liveness", get(handlers::liveness))
        .route("/metrics", get(handlers::metrics));

    let protected = Router::new()
        .route("/status", get(handlers::status))
        .route("/scans", get(handlers::list_scans).post(handlers::create_scan))
        .route("/scans/:id", get(handlers::get_scan))
        .route("/hosts", get(handlers::list_hosts))
        .route(
            "/discovery",
            get(handlers::list_discovery).post(handlers::create_discovery),
        )
        .route("/discovery/:id", get(handlers::get_discovery))
        .route("/networks", get(handlers::list_networks))
        .route("/profiles", get(handlers::list_profiles))
        .route("/schedules", get(handlers::list_schedules))
        .route("/ws/scans", get(ws::scans))
        .route("/ws/discovery", get(ws::discovery))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let mut router = Router::new().nest("/api/v1", public.merge(protected));

    if state.config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(middleware::from_fn(auth::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(state: SharedState, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "API server listening");

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
