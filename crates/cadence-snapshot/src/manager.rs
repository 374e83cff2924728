//! Throttled snapshot generation.
//!
//! [`SnapshotManager`] is called from the FAST `post_tick` hook. At most
//! once per `min_interval` it builds a copy-on-write snapshot of the
//! world, enriches it with transient per-entity fields, attaches the
//! buffered events, encodes the delta against the previous snapshot and
//! hands the delta to the serialization worker. The worker's JSON comes
//! back through a supervisor task and is re-emitted as a
//! [`SimulationEvent::Snapshot`] on a broadcast channel.
//!
//! # Worker supervision
//!
//! The worker runs on its own OS thread. If it exits without having been
//! asked to, the supervisor clears the ready flag and respawns it after
//! `initial_backoff_ms * 2^n` (capped at `max_backoff_ms`), at most
//! `max_restarts` times. Past that the manager is degraded: generation is
//! a no-op and a [`SimulationEvent::WorkerDegraded`] is emitted once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::config::{SnapshotConfig, WorkerConfig};
use cadence_core::sync::lock;
use cadence_core::{AppContext, PerformanceMonitor};
use cadence_state::{DeltaEncoder, StateCache, StateDirtyTracker};
use cadence_types::{
    SimEvent, Snapshot, SnapshotDelta, SnapshotState, TransientFields, WorldState,
};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::SnapshotError;
use crate::protocol::{SimulationEvent, WorkerReply, WorkerRequest};
use crate::worker::{self, WorkerEntry, WorkerExit};

/// Capacity of the simulation event broadcast channel.
///
/// Subscribers that fall further behind receive
/// [`broadcast::error::RecvError::Lagged`] and skip ahead.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Operation name under which generation time is recorded.
pub const GENERATION_OPERATION: &str = "snapshot_generation";

/// Computes per-entity fields that are not part of the world state.
pub trait TransientSource: Send {
    /// Fill `out` for the snapshot about to be encoded.
    fn enrich(&mut self, state: &SnapshotState, tick: u64, out: &mut TransientFields);
}

impl<F> TransientSource for F
where
    F: FnMut(&SnapshotState, u64, &mut TransientFields) + Send,
{
    fn enrich(&mut self, state: &SnapshotState, tick: u64, out: &mut TransientFields) {
        self(state, tick, out);
    }
}

/// Result of one [`SnapshotManager::generate_snapshot_throttled`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The worker is not ready (starting, restarting, degraded, cleaned up).
    NotReady,
    /// The previous generation was less than `min_interval` ago.
    Throttled,
    /// Nothing changed since the previous snapshot.
    NoDelta,
    /// A delta was handed to the worker.
    Posted {
        /// Tick of the posted delta.
        tick: u64,
    },
}

/// Delay before respawn number `attempt + 1`.
pub fn backoff_delay(policy: &WorkerConfig, attempt: u32) -> Duration {
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(policy.max_backoff_ms),
    )
}

// ---------------------------------------------------------------------------
// Worker plumbing
// ---------------------------------------------------------------------------

struct WorkerShared {
    ready: AtomicBool,
    shutting_down: AtomicBool,
    degraded: AtomicBool,
    restarts: AtomicU32,
    incarnation: AtomicU64,
    requests: Mutex<Option<std_mpsc::Sender<WorkerRequest>>>,
    events: broadcast::Sender<SimulationEvent>,
}

impl WorkerShared {
    fn handle_reply(&self, reply: WorkerReply) {
        match reply {
            WorkerReply::Ready => {
                self.ready.store(true, Ordering::Release);
                info!(
                    incarnation = self.incarnation.load(Ordering::Acquire),
                    "Snapshot worker ready"
                );
            }
            WorkerReply::SnapshotReady { data, size } => {
                match serde_json::from_str::<serde_json::Value>(&data) {
                    Ok(value) => {
                        // send fails only when nobody is subscribed.
                        let receivers = self
                            .events
                            .send(SimulationEvent::Snapshot { size, data: value })
                            .unwrap_or(0);
                        trace!(size, receivers, "Snapshot emitted");
                    }
                    Err(e) => warn!(error = %e, size, "Worker returned unparsable snapshot"),
                }
            }
            WorkerReply::Error { error } => {
                warn!(error = %error, "Snapshot worker failed to serialize");
            }
        }
    }
}

struct Worker {
    requests: std_mpsc::Sender<WorkerRequest>,
    replies: mpsc::UnboundedReceiver<WorkerReply>,
    thread: std::thread::JoinHandle<WorkerExit>,
}

fn spawn_worker(entry: WorkerEntry, incarnation: u64) -> std::io::Result<Worker> {
    let (requests, request_rx) = std_mpsc::channel();
    let (reply_tx, replies) = mpsc::unbounded_channel();
    let thread = std::thread::Builder::new()
        .name(format!("snapshot-worker-{incarnation}"))
        .spawn(move || entry(request_rx, &reply_tx))?;
    Ok(Worker {
        requests,
        replies,
        thread,
    })
}

async fn supervise(
    shared: Arc<WorkerShared>,
    entry: WorkerEntry,
    policy: WorkerConfig,
    mut replies: mpsc::UnboundedReceiver<WorkerReply>,
    mut thread: std::thread::JoinHandle<WorkerExit>,
) {
    let mut attempt: u32 = 0;

    loop {
        while let Some(reply) = replies.recv().await {
            shared.handle_reply(reply);
        }

        // Every reply sender is gone: the worker thread has ended.
        shared.ready.store(false, Ordering::Release);
        let joined = tokio::task::spawn_blocking(move || thread.join()).await;
        if shared.shutting_down.load(Ordering::Acquire) {
            debug!("Snapshot supervisor exiting after shutdown");
            return;
        }
        match joined {
            Ok(Ok(exit)) => warn!(?exit, "Snapshot worker exited unexpectedly"),
            Ok(Err(_)) => error!("Snapshot worker panicked"),
            Err(e) => error!(error = %e, "Failed to join snapshot worker"),
        }

        if attempt >= policy.max_restarts {
            shared.degraded.store(true, Ordering::Release);
            error!(
                restarts = attempt,
                "Snapshot worker restart limit reached, snapshots disabled"
            );
            let _receivers = shared
                .events
                .send(SimulationEvent::WorkerDegraded { restarts: attempt })
                .unwrap_or(0);
            return;
        }

        let delay = backoff_delay(&policy, attempt);
        attempt = attempt.saturating_add(1);
        shared.restarts.store(attempt, Ordering::Release);
        warn!(
            attempt,
            delay_ms = delay.as_millis(),
            "Respawning snapshot worker"
        );
        tokio::time::sleep(delay).await;
        if shared.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let incarnation = shared
            .incarnation
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        match spawn_worker(entry, incarnation) {
            Ok(worker) => {
                *lock(&shared.requests) = Some(worker.requests);
                replies = worker.replies;
                thread = worker.thread;
            }
            Err(e) => {
                shared.degraded.store(true, Ordering::Release);
                error!(error = %e, "Failed to respawn snapshot worker, snapshots disabled");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotManager
// ---------------------------------------------------------------------------

/// Throttled snapshot pipeline. See the module documentation.
pub struct SnapshotManager {
    shared: Arc<WorkerShared>,
    supervisor: Option<JoinHandle<()>>,
    cache: StateCache,
    encoder: DeltaEncoder,
    perf: Arc<PerformanceMonitor>,
    min_interval: Duration,
    last_generation: Option<Instant>,
    events: VecDeque<SimEvent>,
    max_events: usize,
    transient: Option<Box<dyn TransientSource>>,
    seen_incarnation: u64,
    posted: u64,
}

impl SnapshotManager {
    /// Spawn the production worker and its supervisor.
    ///
    /// `tracker` must be the tracker the live world reports mutations to.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NoRuntime`] outside a tokio runtime and
    /// [`SnapshotError::Spawn`] if the worker thread cannot be created.
    pub fn new(
        config: &SnapshotConfig,
        ctx: &AppContext,
        tracker: Arc<StateDirtyTracker>,
    ) -> Result<Self, SnapshotError> {
        Self::with_worker(config, ctx, tracker, worker::run)
    }

    /// Like [`new`](Self::new) with a custom worker entry point.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_worker(
        config: &SnapshotConfig,
        ctx: &AppContext,
        tracker: Arc<StateDirtyTracker>,
        entry: WorkerEntry,
    ) -> Result<Self, SnapshotError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_err| SnapshotError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let Worker {
            requests,
            replies,
            thread,
        } = spawn_worker(entry, 1)?;
        let shared = Arc::new(WorkerShared {
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            restarts: AtomicU32::new(0),
            incarnation: AtomicU64::new(1),
            requests: Mutex::new(Some(requests)),
            events,
        });
        let supervisor = runtime.spawn(supervise(
            Arc::clone(&shared),
            entry,
            config.worker.clone(),
            replies,
            thread,
        ));

        debug!(
            min_interval_ms = config.min_interval_ms,
            keyframe_interval = config.keyframe_interval,
            "Snapshot manager created"
        );

        Ok(Self {
            shared,
            supervisor: Some(supervisor),
            cache: StateCache::new(tracker),
            encoder: DeltaEncoder::new(config.keyframe_interval),
            perf: Arc::clone(&ctx.perf),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_generation: None,
            events: VecDeque::new(),
            max_events: config.max_buffered_events,
            transient: None,
            seen_incarnation: 1,
            posted: 0,
        })
    }

    /// Build, encode and post a snapshot unless throttled or not ready.
    pub fn generate_snapshot_throttled(
        &mut self,
        world: &WorldState,
        tick: u64,
    ) -> GenerationOutcome {
        if !self.is_ready() {
            return GenerationOutcome::NotReady;
        }
        let started = Instant::now();
        if let Some(last) = self.last_generation
            && started.saturating_duration_since(last) < self.min_interval
        {
            return GenerationOutcome::Throttled;
        }
        self.last_generation = Some(started);

        // A fresh worker may have lost in-flight deltas; resynchronize.
        let incarnation = self.shared.incarnation.load(Ordering::Acquire);
        if incarnation != self.seen_incarnation {
            self.seen_incarnation = incarnation;
            self.encoder.reset();
        }

        let state = self.cache.get_snapshot(world, tick);

        let mut transient = TransientFields::new();
        if let Some(source) = self.transient.as_mut() {
            source.enrich(&state, tick, &mut transient);
        }

        let snapshot = Snapshot {
            tick,
            updated_at: Utc::now(),
            state,
            transient,
            events: self.events.drain(..).collect(),
        };

        let outcome = match self.encoder.encode_delta(&snapshot) {
            None => GenerationOutcome::NoDelta,
            Some(delta) => match self.post(delta) {
                Ok(()) => {
                    self.posted = self.posted.saturating_add(1);
                    GenerationOutcome::Posted { tick }
                }
                Err(undelivered) => {
                    warn!(
                        tick,
                        events = undelivered.len(),
                        "Snapshot worker unavailable, delta dropped"
                    );
                    // Sections come back with the next keyframe; events only
                    // survive in the buffer.
                    self.encoder.reset();
                    self.restore_events(undelivered);
                    GenerationOutcome::NotReady
                }
            },
        };

        self.perf
            .record_operation(GENERATION_OPERATION, started.elapsed());
        outcome
    }

    /// Buffer an event for the next snapshot. When the buffer is full the
    /// oldest event is dropped.
    pub fn push_event(&mut self, event: SimEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events
            && let Some(dropped) = self.events.pop_front()
        {
            warn!(
                kind = %dropped.kind,
                tick = dropped.tick,
                max = self.max_events,
                "Event buffer full, dropping oldest event"
            );
        }
        self.events.push_back(event);
    }

    /// Put events from an undelivered delta back ahead of anything pushed
    /// since, keeping the newest `max_events`.
    fn restore_events(&mut self, undelivered: Vec<SimEvent>) {
        for event in undelivered.into_iter().rev() {
            self.events.push_front(event);
        }
        let excess = self.events.len().saturating_sub(self.max_events);
        if excess > 0 {
            self.events.drain(..excess);
            warn!(
                dropped = excess,
                max = self.max_events,
                "Event buffer full, dropping oldest events"
            );
        }
    }

    /// Install the transient field source.
    pub fn set_transient_source<S>(&mut self, source: S)
    where
        S: TransientSource + 'static,
    {
        self.transient = Some(Box::new(source));
    }

    /// Remove the transient field source.
    pub fn clear_transient_source(&mut self) {
        self.transient = None;
    }

    /// Forget the previous snapshot: the next generation is a full clone
    /// and a keyframe.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.encoder.reset();
        self.last_generation = None;
    }

    /// Shut the worker down and stop listening for replies. Safe to call
    /// at any time, any number of times.
    pub fn cleanup(&mut self) {
        let already = self.shared.shutting_down.swap(true, Ordering::AcqRel);
        self.shared.ready.store(false, Ordering::Release);
        if let Some(requests) = lock(&self.shared.requests).take()
            && requests.send(WorkerRequest::Shutdown).is_err()
        {
            debug!("Snapshot worker already gone");
        }
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
        self.events.clear();
        if !already {
            info!(posted = self.posted, "Snapshot manager cleaned up");
        }
    }

    /// Whether the worker announced itself and is accepting requests.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Whether the restart budget is exhausted.
    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::Acquire)
    }

    /// Respawns performed so far.
    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::Acquire)
    }

    /// Deltas handed to the worker so far.
    pub const fn posted_count(&self) -> u64 {
        self.posted
    }

    /// Events waiting for the next snapshot.
    pub fn buffered_events(&self) -> usize {
        self.events.len()
    }

    /// Subscribe to re-emitted snapshots and worker status.
    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.shared.events.subscribe()
    }

    /// Sender side of the simulation event channel.
    pub fn event_sender(&self) -> broadcast::Sender<SimulationEvent> {
        self.shared.events.clone()
    }

    /// Hand `delta` to the worker. On failure returns the events it carried.
    fn post(&self, delta: SnapshotDelta) -> Result<(), Vec<SimEvent>> {
        let slot = lock(&self.shared.requests);
        let Some(requests) = slot.as_ref() else {
            return Err(delta.events);
        };
        let request = WorkerRequest::Snapshot {
            data: Box::new(delta),
        };
        requests
            .send(request)
            .map_err(|std_mpsc::SendError(request)| match request {
                WorkerRequest::Snapshot { data } => data.events,
                WorkerRequest::Shutdown => Vec::new(),
            })
    }
}

impl Drop for SnapshotManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl core::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("ready", &self.is_ready())
            .field("degraded", &self.is_degraded())
            .field("restarts", &self.restarts())
            .field("posted", &self.posted)
            .field("buffered_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = WorkerConfig {
            max_restarts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 700,
        };
        let delays: Vec<u128> = (0..5)
            .map(|n| backoff_delay(&policy, n).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 700, 700]);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        let policy = WorkerConfig::default();
        assert_eq!(
            backoff_delay(&policy, u32::MAX),
            Duration::from_millis(policy.max_backoff_ms)
        );
    }
}
