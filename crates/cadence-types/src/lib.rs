//! Shared type definitions for the Cadence simulation core.
//!
//! This crate is the single source of truth for the types exchanged
//! between the scheduler, the state cache, the snapshot worker and
//! downstream consumers. Wire types also flow to `TypeScript` via `ts-rs`
//! for dashboards.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for section record identifiers
//! - [`enums`] -- Tick rates, cache scopes, tracked sections, weather
//! - [`world`] -- The live [`WorldState`] and its section records
//! - [`snapshot`] -- Snapshots, deltas and buffered events

pub mod enums;
pub mod ids;
pub mod snapshot;
pub mod world;

// Re-export all public types at crate root for convenience.
pub use enums::{CacheScope, StateSection, TickRate, Weather};
pub use ids::{AgentId, AnimalId, EntityId, EventId, ResourceNodeId, ZoneId};
pub use snapshot::{
    MapDelta, ScalarChanges, SectionDeltas, SimEvent, Snapshot, SnapshotDelta, SnapshotState,
    TransientFields,
};
pub use world::{
    Agent, Animal, Entity, Inventory, MarketEntry, Position, SocialTies, WorldResource,
    WorldState, WorldTime, Zone,
};
