//! Endpoint handlers.
//!
//! | Method | Path        | Description                                  |
//! |--------|-------------|----------------------------------------------|
//! | `GET`  | `/health`   | Liveness, run state and current tick         |
//! | `GET`  | `/metrics`  | Text exposition of the performance monitor   |
//! | `GET`  | `/stats`    | Scheduler buckets plus the perf snapshot     |
//! | `GET`  | `/systems`  | Registered systems in registration order     |
//! | `GET`  | `/cache`    | Cache bus versions and diagnostic subscribers |
//! | `GET`  | `/snapshot` | Latest snapshot document                     |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use cadence_core::PerfSnapshot;
use cadence_core::scheduler::{SchedulerStats, SystemDescriptor};
use cadence_types::CacheScope;
use serde::Serialize;

use crate::error::ObserverError;
use crate::state::{AppState, LatestSnapshot};

/// Content type of the metrics text exposition.
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the handler answers.
    pub status: &'static str,
    /// Whether the scheduler timers are armed.
    pub running: bool,
    /// FAST passes so far.
    pub tick: u64,
    /// Seconds since the observer state was created.
    pub uptime_secs: u64,
}

/// Body of `GET /stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Scheduler run state and bucket sizes.
    pub scheduler: SchedulerStats,
    /// Timing aggregates.
    pub perf: PerfSnapshot,
}

/// Body of `GET /cache`.
#[derive(Debug, Serialize)]
pub struct CacheResponse {
    /// Global version.
    pub version: u64,
    /// Version per scope.
    pub scopes: BTreeMap<CacheScope, u64>,
    /// Diagnostic subscriber names.
    pub subscribers: Vec<String>,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        running: state.scheduler.is_running(),
        tick: state.scheduler.current_tick(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.ctx.perf.to_metrics_text(),
    )
}

/// `GET /stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        scheduler: state.scheduler.stats(),
        perf: state.ctx.perf.snapshot(),
    })
}

/// `GET /systems`
pub async fn systems(State(state): State<Arc<AppState>>) -> Json<Vec<SystemDescriptor>> {
    Json(state.scheduler.systems_list())
}

/// `GET /cache`
pub async fn cache(State(state): State<Arc<AppState>>) -> Json<CacheResponse> {
    let bus = &state.ctx.cache_bus;
    Json(CacheResponse {
        version: bus.version(),
        scopes: bus.versions(),
        subscribers: bus.subscribers(),
    })
}

/// `GET /snapshot`
pub async fn latest_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LatestSnapshot>, ObserverError> {
    state
        .latest_snapshot
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| ObserverError::NotFound("no snapshot emitted yet".to_owned()))
}
