//! The live world as seen by systems and hooks.
//!
//! Systems and scheduler hooks all run on the scheduler's tasks and only
//! borrow the world synchronously, so a plain mutex is enough. Events
//! raised by systems are queued here and moved into the snapshot manager
//! by the FAST `post_tick` hook.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use cadence_core::sync::lock;
use cadence_state::TrackedWorld;
use cadence_types::SimEvent;

/// World state, pending events and the engine tick counter.
#[derive(Debug)]
pub struct SharedWorld {
    world: Mutex<TrackedWorld>,
    pending: Mutex<Vec<SimEvent>>,
    tick: AtomicU64,
}

impl SharedWorld {
    /// Share `world` with tick 0 and no pending events.
    pub const fn new(world: TrackedWorld) -> Self {
        Self {
            world: Mutex::new(world),
            pending: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
        }
    }

    /// Run `f` with exclusive access to the world.
    ///
    /// `f` must not call back into [`SharedWorld`] methods that lock the
    /// world.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut TrackedWorld) -> R) -> R {
        f(&mut lock(&self.world))
    }

    /// Queue an event stamped with the current tick.
    pub fn raise(&self, kind: &str, payload: serde_json::Value) {
        let event = SimEvent::new(self.tick(), kind, payload);
        lock(&self.pending).push(event);
    }

    /// Current engine tick (number of FAST passes begun).
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Begin a FAST pass. Returns the new tick.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut *lock(&self.pending))
    }

    /// Entity count of the live world.
    pub fn entity_count(&self) -> usize {
        lock(&self.world).entity_count()
    }
}
