//! Mutation wrapper that keeps the dirty set honest.
//!
//! [`TrackedWorld`] owns the live [`WorldState`]. The only way to get a
//! mutable reference to a tracked section is through its `*_mut` accessor,
//! which flags the section before handing the reference out. Code holding
//! a `TrackedWorld` therefore cannot change a section without the next
//! snapshot seeing it.
//!
//! Scalars (time, cycles, weather, resource totals) are copied into every
//! snapshot regardless, so their accessors do not flag anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_types::{
    Agent, AgentId, Animal, AnimalId, Entity, EntityId, Inventory, MarketEntry, ResourceNodeId,
    SocialTies, StateSection, Weather, WorldResource, WorldState, WorldTime, Zone, ZoneId,
};

use crate::dirty::StateDirtyTracker;

/// Generates a `*_mut` accessor that flags its section.
macro_rules! tracked_section {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $section:expr, $key:ty, $value:ty) => {
        $(#[$meta])*
        pub fn $fn_name(&mut self) -> &mut BTreeMap<$key, $value> {
            self.tracker.mark_dirty($section);
            &mut self.state.$field
        }
    };
}

/// Live world state plus the tracker its mutations feed.
#[derive(Debug)]
pub struct TrackedWorld {
    state: WorldState,
    tracker: Arc<StateDirtyTracker>,
}

impl TrackedWorld {
    /// Wrap `state` with a fresh tracker.
    pub fn new(state: WorldState) -> Self {
        Self::with_tracker(state, Arc::new(StateDirtyTracker::new()))
    }

    /// Wrap `state`, reporting mutations to an existing tracker.
    pub const fn with_tracker(state: WorldState, tracker: Arc<StateDirtyTracker>) -> Self {
        Self { state, tracker }
    }

    /// Read-only view of the live state.
    pub const fn state(&self) -> &WorldState {
        &self.state
    }

    /// The tracker mutations are reported to.
    pub const fn tracker(&self) -> &Arc<StateDirtyTracker> {
        &self.tracker
    }

    /// Swap the whole state out. Every section is flagged.
    pub fn replace(&mut self, state: WorldState) -> WorldState {
        self.tracker.mark_all();
        std::mem::replace(&mut self.state, state)
    }

    /// Living agents plus animals plus entities.
    pub fn entity_count(&self) -> usize {
        self.state.entity_count()
    }

    tracked_section!(
        /// Mutable `agents`; flags [`StateSection::Agents`].
        agents_mut, agents, StateSection::Agents, AgentId, Agent
    );
    tracked_section!(
        /// Mutable `entities`; flags [`StateSection::Entities`].
        entities_mut, entities, StateSection::Entities, EntityId, Entity
    );
    tracked_section!(
        /// Mutable `animals`; flags [`StateSection::Animals`].
        animals_mut, animals, StateSection::Animals, AnimalId, Animal
    );
    tracked_section!(
        /// Mutable `zones`; flags [`StateSection::Zones`].
        zones_mut, zones, StateSection::Zones, ZoneId, Zone
    );
    tracked_section!(
        /// Mutable `worldResources`; flags [`StateSection::WorldResources`].
        world_resources_mut,
        world_resources,
        StateSection::WorldResources,
        ResourceNodeId,
        WorldResource
    );
    tracked_section!(
        /// Mutable `inventory`; flags [`StateSection::Inventory`].
        inventory_mut, inventory, StateSection::Inventory, AgentId, Inventory
    );
    tracked_section!(
        /// Mutable `socialGraph`; flags [`StateSection::SocialGraph`].
        social_graph_mut, social_graph, StateSection::SocialGraph, AgentId, SocialTies
    );
    tracked_section!(
        /// Mutable `market`; flags [`StateSection::Market`].
        market_mut, market, StateSection::Market, String, MarketEntry
    );

    /// Mutable calendar time.
    pub const fn time_mut(&mut self) -> &mut WorldTime {
        &mut self.state.time
    }

    /// Mutable cycle counter.
    pub const fn cycles_mut(&mut self) -> &mut u64 {
        &mut self.state.cycles
    }

    /// Mutable weather.
    pub const fn weather_mut(&mut self) -> &mut Weather {
        &mut self.state.weather
    }

    /// Mutable resource totals.
    pub const fn resource_totals_mut(&mut self) -> &mut BTreeMap<String, u64> {
        &mut self.state.resource_totals
    }
}

impl Default for TrackedWorld {
    fn default() -> Self {
        Self::new(WorldState::default())
    }
}
