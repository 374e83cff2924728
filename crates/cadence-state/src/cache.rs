//! Copy-on-write snapshot builder.
//!
//! [`StateCache::get_snapshot`] turns the live [`WorldState`] into an
//! immutable [`SnapshotState`]. Sections flagged in the dirty tracker are
//! deep-cloned; every other section reuses the `Arc` of the previous
//! snapshot, so an unchanged section costs one reference-count increment.
//!
//! The cache trusts the dirty set. A section mutated without being
//! flagged keeps its stale shared copy, which is why mutation goes through
//! [`TrackedWorld`](crate::TrackedWorld).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cadence_types::{SnapshotState, StateSection, WorldState};
use tracing::trace;

use crate::dirty::StateDirtyTracker;

/// Snapshot builder holding the previous snapshot for reuse.
#[derive(Debug)]
pub struct StateCache {
    tracker: Arc<StateDirtyTracker>,
    previous: Option<SnapshotState>,
}

impl StateCache {
    /// A cache consuming `tracker`'s dirty set.
    pub const fn new(tracker: Arc<StateDirtyTracker>) -> Self {
        Self {
            tracker,
            previous: None,
        }
    }

    /// The tracker this cache reads.
    pub const fn tracker(&self) -> &Arc<StateDirtyTracker> {
        &self.tracker
    }

    /// Build a snapshot of `state` taken at FAST tick `tick`.
    ///
    /// Produces a full deep clone when there is no previous snapshot or
    /// when every section is dirty; otherwise only dirty sections are
    /// cloned. Scalars are always copied. The dirty set is flushed in the
    /// same step it is read, so a section flagged afterwards stays pending
    /// for the next call.
    pub fn get_snapshot(&mut self, state: &WorldState, tick: u64) -> SnapshotState {
        let dirty = self.tracker.take();

        let snapshot = match self.previous.as_ref() {
            Some(previous) if dirty.len() < StateSection::ALL.len() => {
                trace!(tick, dirty = dirty.len(), "Partial snapshot");
                partial_clone(state, previous, &dirty)
            }
            _ => {
                trace!(tick, "Full snapshot");
                SnapshotState::full_clone(state)
            }
        };

        self.previous = Some(snapshot.clone());
        snapshot
    }

    /// Flag a section on the underlying tracker.
    pub fn mark_dirty(&self, section: StateSection) {
        self.tracker.mark_dirty(section);
    }

    /// Flag several sections on the underlying tracker.
    pub fn mark_dirty_multiple<I>(&self, sections: I)
    where
        I: IntoIterator<Item = StateSection>,
    {
        self.tracker.mark_dirty_multiple(sections);
    }

    /// Empty the dirty set, keeping the previous snapshot.
    pub fn clear_dirty_flags(&self) {
        self.tracker.clear();
    }

    /// Empty the dirty set and forget the previous snapshot, so the next
    /// call to [`get_snapshot`](Self::get_snapshot) is a full clone.
    pub fn reset(&mut self) {
        self.tracker.clear();
        self.previous = None;
    }

    /// The last snapshot produced, if any.
    pub const fn previous_snapshot(&self) -> Option<&SnapshotState> {
        self.previous.as_ref()
    }
}

fn partial_clone(
    state: &WorldState,
    previous: &SnapshotState,
    dirty: &BTreeSet<StateSection>,
) -> SnapshotState {
    let is_dirty = |section| dirty.contains(&section);
    SnapshotState {
        time: state.time,
        cycles: state.cycles,
        weather: state.weather,
        resource_totals: state.resource_totals.clone(),
        agents: carry(
            is_dirty(StateSection::Agents),
            &state.agents,
            &previous.agents,
        ),
        entities: carry(
            is_dirty(StateSection::Entities),
            &state.entities,
            &previous.entities,
        ),
        animals: carry(
            is_dirty(StateSection::Animals),
            &state.animals,
            &previous.animals,
        ),
        zones: carry(is_dirty(StateSection::Zones), &state.zones, &previous.zones),
        world_resources: carry(
            is_dirty(StateSection::WorldResources),
            &state.world_resources,
            &previous.world_resources,
        ),
        inventory: carry(
            is_dirty(StateSection::Inventory),
            &state.inventory,
            &previous.inventory,
        ),
        social_graph: carry(
            is_dirty(StateSection::SocialGraph),
            &state.social_graph,
            &previous.social_graph,
        ),
        market: carry(
            is_dirty(StateSection::Market),
            &state.market,
            &previous.market,
        ),
    }
}

fn carry<K, V>(
    dirty: bool,
    live: &BTreeMap<K, V>,
    previous: &Arc<BTreeMap<K, V>>,
) -> Arc<BTreeMap<K, V>>
where
    K: Clone,
    V: Clone,
{
    if dirty {
        Arc::new(live.clone())
    } else {
        Arc::clone(previous)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cadence_types::{Agent, AgentId, Position, Weather, Zone, ZoneId};

    use super::*;
    use crate::TrackedWorld;

    fn seeded() -> TrackedWorld {
        let mut world = TrackedWorld::default();
        let agent = Agent {
            id: AgentId::new(),
            name: "Ada".to_owned(),
            position: Position { x: 1, y: 2 },
            zone_id: None,
            health: 80,
            hunger: 10,
            energy: 90,
            alive: true,
        };
        world.agents_mut().insert(agent.id, agent);
        let zone = Zone {
            id: ZoneId::new(),
            name: "Square".to_owned(),
            kind: "plaza".to_owned(),
            capacity: 10,
            occupants: std::collections::BTreeSet::new(),
        };
        world.zones_mut().insert(zone.id, zone);
        world.tracker().clear();
        world
    }

    #[test]
    fn first_snapshot_is_a_deep_copy() {
        let mut world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let mut snapshot = cache.get_snapshot(world.state(), 0);

        // Mutating the snapshot leaves the world alone.
        Arc::make_mut(&mut snapshot.agents).clear();
        assert_eq!(world.state().agents.len(), 1);

        // Mutating the world leaves the snapshot alone.
        let previous = cache.previous_snapshot().unwrap().clone();
        world.zones_mut().clear();
        assert_eq!(previous.zones.len(), 1);
    }

    #[test]
    fn dirty_agents_keeps_zones_shared() {
        let world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let first = cache.get_snapshot(world.state(), 0);
        cache.clear_dirty_flags();

        cache.mark_dirty(StateSection::Agents);
        let second = cache.get_snapshot(world.state(), 1);

        assert!(Arc::ptr_eq(&first.zones, &second.zones));
        assert!(!Arc::ptr_eq(&first.agents, &second.agents));
        for section in StateSection::ALL {
            let shared = first.shares_section(&second, section);
            assert_eq!(shared, section != StateSection::Agents, "{section}");
        }
    }

    #[test]
    fn all_dirty_shares_nothing() {
        let world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let first = cache.get_snapshot(world.state(), 0);
        cache.mark_dirty_multiple(StateSection::ALL);
        let second = cache.get_snapshot(world.state(), 1);
        for section in StateSection::ALL {
            assert!(!first.shares_section(&second, section), "{section}");
        }
        assert_eq!(first, second);
    }

    #[test]
    fn reset_forces_full_clone() {
        let world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let first = cache.get_snapshot(world.state(), 0);
        cache.reset();
        assert!(cache.previous_snapshot().is_none());
        let second = cache.get_snapshot(world.state(), 1);
        for section in StateSection::ALL {
            assert!(!first.shares_section(&second, section), "{section}");
        }
    }

    #[test]
    fn scalars_are_always_refreshed() {
        let mut world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let _ = cache.get_snapshot(world.state(), 0);
        *world.weather_mut() = Weather::Storm;
        world.time_mut().advance(90);
        let snapshot = cache.get_snapshot(world.state(), 1);
        assert_eq!(snapshot.weather, Weather::Storm);
        assert_eq!(snapshot.time.hour, 1);
    }

    #[test]
    fn snapshot_flushes_only_what_it_read() {
        let mut world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let _ = cache.get_snapshot(world.state(), 0);

        world.agents_mut().clear();
        let second = cache.get_snapshot(world.state(), 1);
        assert!(second.agents.is_empty());
        assert!(cache.tracker().is_empty());

        // Flagged after the flush: picked up by the next snapshot.
        world.zones_mut().clear();
        assert!(cache.tracker().is_dirty(StateSection::Zones));
        let third = cache.get_snapshot(world.state(), 2);
        assert!(third.zones.is_empty());
        assert!(!Arc::ptr_eq(&second.zones, &third.zones));
        assert!(Arc::ptr_eq(&second.agents, &third.agents));
    }

    #[test]
    fn clear_dirty_flags_keeps_previous() {
        let world = seeded();
        let mut cache = StateCache::new(Arc::clone(world.tracker()));
        let _ = cache.get_snapshot(world.state(), 0);
        cache.mark_dirty(StateSection::Market);
        cache.clear_dirty_flags();
        assert!(cache.tracker().is_empty());
        assert!(cache.previous_snapshot().is_some());
    }
}
