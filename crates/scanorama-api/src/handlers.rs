//! REST endpoint handlers.
//!
//! Handlers stay thin: parse and validate inputs, call the store or enqueue
//! engine work, wrap the result in the shared envelope.

use std::time::Duration;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scanorama_core::types::{
    DiscoveryMethod, HostStatus, ScanType, TargetSelector,
};
use scanorama_core::ErrorCode;
use scanorama_engine::discovery::{DiscoveryRequest, DiscoveryWorkItem};
use scanorama_engine::scan::{ScanRequest, ScanWorkItem};
use scanorama_engine::targets;
use scanorama_store::HostFilter;

use crate::response::{ApiError, Envelope, RequestId};
use crate::server::SharedState;

// ── Health & status ───────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: DependencyStatus,
    pub worker_pool: PoolStatus,
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub connections: u32,
    pub idle: usize,
}

#[derive(Serialize)]
pub struct PoolStatus {
    pub running: bool,
    pub queue_depth: usize,
}

/// Liveness plus dependency checks: database reachable, worker pool live.
pub async fn health(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    let database = match tokio::time::timeout(Duration::from_secs(5), state.store.ping()).await {
        Ok(Ok(())) => {
            let (connections, idle) = state.store.pool_stats();
            DependencyStatus {
                status: "ok",
                error: None,
                connections,
                idle,
            }
        }
        Ok(Err(e)) => DependencyStatus {
            status: "error",
            error: Some(e.to_string()),
            connections: 0,
            idle: 0,
        },
        Err(_) => DependencyStatus {
            status: "error",
            error: Some("database ping timed out".to_string()),
            connections: 0,
            idle: 0,
        },
    };

    let worker_pool = PoolStatus {
        running: state.pool.is_running(),
        queue_depth: state.pool.queue_depth(),
    };

    let healthy = database.status == "ok" && worker_pool.running;
    let body = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" },
        database,
        worker_pool,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(Envelope::data(request_id, body))).into_response()
}

/// Process responsiveness only; no dependency I/O.
pub async fn liveness(Extension(request_id): Extension<RequestId>) -> Response {
    Json(Envelope::data(
        request_id,
        serde_json::json!({ "status": "alive" }),
    ))
    .into_response()
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub uptime_secs: i64,
    pub worker_pool: PoolStatus,
    pub running_discovery_jobs: i64,
    pub running_scan_jobs: i64,
    pub hosts_total: i64,
    pub hosts_up: i64,
}

pub async fn status(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<Envelope<SystemStatus>>, ApiError> {
    let (running_discovery_jobs, running_scan_jobs) = state
        .store
        .job_counts(scanorama_core::types::JobStatus::Running)
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    let (hosts_total, hosts_up) = state
        .store
        .host_counts()
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;

    Ok(Json(Envelope::data(
        request_id,
        SystemStatus {
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: (Utc::now() - state.started_at).num_seconds(),
            worker_pool: PoolStatus {
                running: state.pool.is_running(),
                queue_depth: state.pool.queue_depth(),
            },
            running_discovery_jobs,
            running_scan_jobs,
            hosts_total,
            hosts_up,
        },
    )))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<SharedState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

// ── Scans ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn list_scans(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let jobs = state
        .store
        .list_scan_jobs(query.limit.unwrap_or(50).clamp(1, 500))
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, jobs)).into_response())
}

pub async fn get_scan(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state
        .store
        .get_scan_job(id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, job)).into_response())
}

#[derive(Deserialize)]
pub struct CreateScanBody {
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    #[serde(default)]
    pub live_hosts: bool,
    #[serde(default)]
    pub os_family: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub scan_type: Option<ScanType>,
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Serialize)]
pub struct Submitted {
    pub work_id: Uuid,
    pub status: &'static str,
}

/// Enqueue an on-demand scan through the same worker-pool path the
/// scheduler uses.
pub async fn create_scan(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CreateScanBody>,
) -> Result<Response, ApiError> {
    let selector = match (&body.targets, &body.network, body.live_hosts) {
        (Some(list), _, _) if !list.is_empty() => TargetSelector::Explicit {
            targets: list.clone(),
        },
        (_, Some(name), _) => TargetSelector::Network { name: name.clone() },
        (_, _, true) => TargetSelector::LiveHosts {
            os_family: body.os_family.clone(),
        },
        _ => {
            return Err(ApiError::new(
                ErrorCode::InvalidConfig,
                "one of targets, network, or live_hosts is required",
                request_id,
            ));
        }
    };

    let request = ScanRequest {
        selector,
        scan_type: body.scan_type.unwrap_or(state.scanning.default_scan_type),
        profile: body.profile,
        ports: body.ports,
        timeout: None,
    };
    let work = ScanWorkItem::new(state.orchestrator.clone(), request);
    let work_id = scanorama_engine::pool::Job::id(&work);
    state
        .pool
        .submit(Box::new(work))
        .map_err(|e| ApiError::from_engine(e, request_id))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::message(
            request_id,
            Submitted {
                work_id,
                status: "queued",
            },
            "scan queued",
        )),
    )
        .into_response())
}

// ── Hosts ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HostsQuery {
    pub status: Option<String>,
    pub os: Option<String>,
    pub last_seen: Option<String>,
    #[serde(default)]
    pub show_ignored: bool,
}

pub async fn list_hosts(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<HostsQuery>,
) -> Result<Response, ApiError> {
    let status = match &query.status {
        Some(raw) => Some(raw.parse::<HostStatus>().map_err(|e| {
            ApiError::new(ErrorCode::InvalidConfig, e, request_id)
        })?),
        None => None,
    };
    let last_seen_within = match &query.last_seen {
        Some(raw) => Some(parse_window(raw).ok_or_else(|| {
            ApiError::new(
                ErrorCode::InvalidConfig,
                format!("invalid last_seen window: {raw:?}"),
                request_id,
            )
        })?),
        None => None,
    };

    let hosts = state
        .store
        .list_hosts(&HostFilter {
            status,
            os_family: query.os.clone(),
            last_seen_within,
            show_ignored: query.show_ignored,
        })
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, hosts)).into_response())
}

/// Parse a relative window like `90m`, `1h`, `24h`, or `7d`.
pub fn parse_window(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.len().checked_sub(1)?);
    let n: i64 = value.parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit {
        "m" => Some(chrono::Duration::minutes(n)),
        "h" => Some(chrono::Duration::hours(n)),
        "d" => Some(chrono::Duration::days(n)),
        _ => None,
    }
}

// ── Discovery ─────────────────────────────────────────────────────

pub async fn list_discovery(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let jobs = state
        .store
        .list_discovery_jobs(query.limit.unwrap_or(50).clamp(1, 500))
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, jobs)).into_response())
}

pub async fn get_discovery(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state
        .store
        .get_discovery_job(id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, job)).into_response())
}

#[derive(Deserialize)]
pub struct CreateDiscoveryBody {
    pub network: String,
    #[serde(default)]
    pub method: Option<DiscoveryMethod>,
    #[serde(default)]
    pub detect_os: bool,
}

pub async fn create_discovery(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CreateDiscoveryBody>,
) -> Result<Response, ApiError> {
    // Validate the CIDR up front so the caller gets a synchronous 400.
    targets::normalize_cidr(&body.network)
        .map_err(|e| ApiError::from_engine(e, request_id))?;

    let request = DiscoveryRequest {
        network: body.network,
        network_id: None,
        method: body.method.unwrap_or_default(),
        detect_os: body.detect_os,
        timeout_override: None,
    };
    let work = DiscoveryWorkItem::new(state.discovery.clone(), request);
    let work_id = scanorama_engine::pool::Job::id(&work);
    state
        .pool
        .submit(Box::new(work))
        .map_err(|e| ApiError::from_engine(e, request_id))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::message(
            request_id,
            Submitted {
                work_id,
                status: "queued",
            },
            "discovery queued",
        )),
    )
        .into_response())
}

// ── Read-only listings ────────────────────────────────────────────

pub async fn list_networks(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Response, ApiError> {
    let networks = state
        .store
        .list_networks()
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, networks)).into_response())
}

pub async fn list_profiles(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Response, ApiError> {
    let profiles = state
        .store
        .list_profiles(false)
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, profiles)).into_response())
}

pub async fn list_schedules(
    State(state): State<SharedState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Response, ApiError> {
    let schedules = state
        .store
        .list_scheduled_jobs(false)
        .await
        .map_err(|e| ApiError::from_store(e, request_id))?;
    Ok(Json(Envelope::data(request_id, schedules)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing() {
        assert_eq!(parse_window("1h"), Some(chrono::Duration::hours(1)));
        assert_eq!(parse_window("24h"), Some(chrono::Duration::hours(24)));
        assert_eq!(parse_window("7d"), Some(chrono::Duration::days(7)));
        assert_eq!(parse_window("90m"), Some(chrono::Duration::minutes(90)));

        assert_eq!(parse_window(""), None);
        assert_eq!(parse_window("h"), None);
        assert_eq!(parse_window("-1h"), None);
        assert_eq!(parse_window("0d"), None);
        assert_eq!(parse_window("5w"), None);
    }
}
