//! Composition root.
//!
//! [`Engine::build`] wires the seed world, the demo systems, the
//! scheduler hooks and the snapshot manager together:
//!
//! - `pre_tick(FAST)` advances the engine tick;
//! - `post_tick(FAST)` moves raised events into the snapshot manager and
//!   asks it for a throttled snapshot of the live world;
//! - `entity_count` reads the live world.
//!
//! MEDIUM and SLOW passes have no hook work; their systems publish cache
//! invalidations themselves.

use std::sync::{Arc, Mutex};

use cadence_core::config::SimulationConfig;
use cadence_core::scheduler::{EntityCounter, TickHook};
use cadence_core::sync::lock;
use cadence_core::{AppContext, MultiRateScheduler, SchedulerHooks};
use cadence_snapshot::{GenerationOutcome, SimulationEvent, SnapshotManager};
use cadence_state::{StateDirtyTracker, TrackedWorld};
use cadence_types::TickRate;
use tokio::sync::broadcast;
use tracing::{info, trace};

use crate::error::EngineError;
use crate::seed::seed_world;
use crate::systems;
use crate::world::SharedWorld;

/// A fully wired simulation, not yet started.
#[derive(Debug)]
pub struct Engine {
    shared: Arc<SharedWorld>,
    scheduler: Arc<MultiRateScheduler>,
    snapshots: Arc<Mutex<SnapshotManager>>,
}

impl Engine {
    /// Seed the world and wire every component.
    ///
    /// Must run inside a tokio runtime (the snapshot worker supervisor is
    /// spawned here).
    pub fn build(config: &SimulationConfig, ctx: &AppContext) -> Result<Self, EngineError> {
        let tracker = Arc::new(StateDirtyTracker::new());
        let world = TrackedWorld::with_tracker(seed_world(&config.world), Arc::clone(&tracker));
        let shared = Arc::new(SharedWorld::new(world));

        let mut manager = SnapshotManager::new(&config.snapshot, ctx, tracker)?;
        manager.set_transient_source(systems::activity_hints);
        let snapshots = Arc::new(Mutex::new(manager));

        let scheduler = Arc::new(MultiRateScheduler::new(
            &config.scheduler,
            Arc::clone(&ctx.perf),
        ));
        systems::register_all(&scheduler, &shared, &ctx.cache_bus, config.world.seed);
        scheduler.set_hooks(hooks(&shared, &snapshots));

        Ok(Self {
            shared,
            scheduler,
            snapshots,
        })
    }

    /// Arm the scheduler timers.
    pub fn start(&self) -> Result<(), EngineError> {
        self.scheduler.start()?;
        info!(
            rates = ?self.scheduler.tick_rates(),
            systems = self.scheduler.systems_list().len(),
            snapshots_ready = self.snapshots_ready(),
            "Simulation running"
        );
        Ok(())
    }

    /// Stop the timers and shut the snapshot worker down.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        lock(&self.snapshots).cleanup();
        info!(tick = self.shared.tick(), "Simulation stopped");
    }

    /// The scheduler, for introspection.
    pub const fn scheduler(&self) -> &Arc<MultiRateScheduler> {
        &self.scheduler
    }

    /// The live world.
    pub const fn world(&self) -> &Arc<SharedWorld> {
        &self.shared
    }

    /// Receive re-emitted snapshots and worker status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        lock(&self.snapshots).subscribe()
    }

    /// Whether the snapshot worker is accepting requests.
    pub fn snapshots_ready(&self) -> bool {
        lock(&self.snapshots).is_ready()
    }
}

fn hooks(shared: &Arc<SharedWorld>, snapshots: &Arc<Mutex<SnapshotManager>>) -> SchedulerHooks {
    let pre_world = Arc::clone(shared);
    let pre_tick: TickHook = Arc::new(move |rate| {
        if rate == TickRate::Fast {
            pre_world.advance_tick();
        }
    });

    let post_world = Arc::clone(shared);
    let post_snapshots = Arc::clone(snapshots);
    let post_tick: TickHook = Arc::new(move |rate| {
        if rate == TickRate::Fast {
            let outcome = publish(&post_world, &post_snapshots);
            trace!(?outcome, "Snapshot generation");
        }
    });

    let count_world = Arc::clone(shared);
    let entity_count: EntityCounter = Arc::new(move || count_world.entity_count());

    SchedulerHooks {
        pre_tick: Some(pre_tick),
        post_tick: Some(post_tick),
        entity_count: Some(entity_count),
    }
}

/// Hand pending events to the manager, then request a snapshot.
///
/// Lock order is manager then world; systems only ever take the world.
fn publish(shared: &SharedWorld, snapshots: &Mutex<SnapshotManager>) -> GenerationOutcome {
    let events = shared.drain_events();
    let mut manager = lock(snapshots);
    for event in events {
        manager.push_event(event);
    }
    let tick = shared.tick();
    shared.with_world(|world| manager.generate_snapshot_throttled(world.state(), tick))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use cadence_types::StateSection;
    use serde_json::json;

    use super::*;

    async fn ready_engine(config: &SimulationConfig) -> Engine {
        let engine = Engine::build(config, &AppContext::new()).unwrap();
        for _ in 0..200 {
            if engine.snapshots_ready() {
                return engine;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("snapshot worker never became ready");
    }

    async fn next_snapshot(rx: &mut broadcast::Receiver<SimulationEvent>) -> serde_json::Value {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SimulationEvent::Snapshot { data, .. } => data,
            SimulationEvent::WorkerDegraded { .. } => panic!("worker degraded"),
        }
    }

    #[tokio::test]
    async fn build_registers_every_demo_system() {
        let engine = ready_engine(&SimulationConfig::default()).await;
        let names: Vec<String> = engine
            .scheduler()
            .systems_list()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            [
                "clock",
                "needs",
                "forage",
                "economy",
                "social",
                "weather",
                "resource_regen"
            ]
        );
        assert_eq!(engine.scheduler().entity_count(), 11);
        engine.shutdown();
    }

    #[tokio::test]
    async fn fast_pass_emits_keyframe_with_activity_hints() {
        let engine = ready_engine(&SimulationConfig::default()).await;
        let mut rx = engine.subscribe();

        engine.world().raise("spawned", json!({ "who": "test" }));
        engine.scheduler().run_pass(TickRate::Fast).await;

        let data = next_snapshot(&mut rx).await;
        assert_eq!(data["tick"], 1);
        assert_eq!(data["keyframe"], true);
        assert_eq!(data["events"][0]["kind"], "spawned");
        assert_eq!(data["transient"]["upserted"].as_object().unwrap().len(), 6);
        assert!(engine.world().drain_events().is_empty());
        engine.shutdown();
    }

    #[tokio::test]
    async fn throttle_holds_back_second_pass() {
        let engine = ready_engine(&SimulationConfig::default()).await;
        let mut rx = engine.subscribe();

        engine.scheduler().run_pass(TickRate::Fast).await;
        next_snapshot(&mut rx).await;

        engine.world().with_world(|w| w.animals_mut().clear());
        engine.scheduler().run_pass(TickRate::Fast).await;
        assert_eq!(engine.world().tick(), 2);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        // Still pending for the next generation that is not throttled.
        assert!(
            engine
                .world()
                .with_world(|w| w.tracker().is_dirty(StateSection::Animals))
        );
        engine.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_scheduler_and_worker() {
        let engine = ready_engine(&SimulationConfig::default()).await;
        engine.start().unwrap();
        assert!(engine.scheduler().is_running());
        engine.shutdown();
        assert!(!engine.scheduler().is_running());
        assert!(!engine.snapshots_ready());
    }
}
