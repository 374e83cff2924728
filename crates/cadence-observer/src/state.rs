//! Shared state for the observer handlers.
//!
//! [`AppState`] gives read access to the scheduler and the process-wide
//! services, and keeps the most recent snapshot document emitted by the
//! snapshot manager.

use std::sync::Arc;
use std::time::Instant;

use cadence_core::{AppContext, MultiRateScheduler};
use cadence_snapshot::SimulationEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The last snapshot document seen on the simulation event channel.
#[derive(Debug, Clone, Serialize)]
pub struct LatestSnapshot {
    /// Serialized size in bytes.
    pub size: usize,
    /// When the observer received it.
    pub received_at: DateTime<Utc>,
    /// The delta document.
    pub data: serde_json::Value,
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected through Axum's `State` extractor.
pub struct AppState {
    /// Cache bus and performance monitor.
    pub ctx: AppContext,
    /// The running scheduler.
    pub scheduler: Arc<MultiRateScheduler>,
    /// Most recent snapshot document, if any arrived yet.
    pub latest_snapshot: RwLock<Option<LatestSnapshot>>,
    /// Process start, for uptime.
    pub started_at: Instant,
}

impl AppState {
    /// State over the given services and scheduler.
    pub fn new(ctx: AppContext, scheduler: Arc<MultiRateScheduler>) -> Self {
        Self {
            ctx,
            scheduler,
            latest_snapshot: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    /// Remember `data` as the latest snapshot.
    pub async fn record_snapshot(&self, size: usize, data: serde_json::Value) {
        *self.latest_snapshot.write().await = Some(LatestSnapshot {
            size,
            received_at: Utc::now(),
            data,
        });
    }

    /// Keep [`latest_snapshot`](Self::latest_snapshot) current from the
    /// simulation event channel until it closes.
    pub fn follow(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SimulationEvent>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SimulationEvent::Snapshot { size, data }) => {
                        state.record_snapshot(size, data).await;
                    }
                    Ok(SimulationEvent::WorkerDegraded { restarts }) => {
                        warn!(restarts, "Snapshots disabled, observer keeps last document");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Observer lagged behind snapshot stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Simulation event channel closed");
                        return;
                    }
                }
            }
        })
    }
}

impl core::fmt::Debug for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("scheduler", &self.scheduler)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
