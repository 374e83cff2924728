//! Snapshot, delta and event types.
//!
//! A [`SnapshotState`] is an immutable view of the world at one tick. Its
//! tracked sections sit behind [`Arc`] so a section that did not change
//! between two snapshots is shared by reference rather than copied.
//! [`SnapshotDelta`] is what actually travels to clients: only the
//! entries that changed since the previous delta.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{StateSection, Weather};
use crate::ids::{AgentId, AnimalId, EntityId, EventId, ResourceNodeId, ZoneId};
use crate::world::{
    Agent, Animal, Entity, Inventory, MarketEntry, SocialTies, WorldResource, WorldState,
    WorldTime, Zone,
};

/// Per-entity fields computed at snapshot time and never stored in the
/// world (current goal, animation hint, ...). Keyed by entity ID string.
pub type TransientFields = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A gameplay event buffered between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SimEvent {
    /// Event identifier.
    pub id: EventId,
    /// FAST tick during which the event was raised.
    pub tick: u64,
    /// Event kind (`"agent_died"`, `"trade_completed"`, ...).
    pub kind: String,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl SimEvent {
    /// Create an event stamped with a fresh ID and the current time.
    pub fn new(tick: u64, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            tick,
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotState
// ---------------------------------------------------------------------------

/// Immutable world view produced by the state cache.
///
/// Cloning a `SnapshotState` is cheap: sections are reference-counted and
/// only the scalars are copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    /// In-world calendar time.
    pub time: WorldTime,
    /// Completed day/night cycles.
    pub cycles: u64,
    /// Current weather.
    pub weather: Weather,
    /// Aggregate stock per resource name.
    pub resource_totals: BTreeMap<String, u64>,
    /// `agents` section.
    pub agents: Arc<BTreeMap<AgentId, Agent>>,
    /// `entities` section.
    pub entities: Arc<BTreeMap<EntityId, Entity>>,
    /// `animals` section.
    pub animals: Arc<BTreeMap<AnimalId, Animal>>,
    /// `zones` section.
    pub zones: Arc<BTreeMap<ZoneId, Zone>>,
    /// `worldResources` section.
    pub world_resources: Arc<BTreeMap<ResourceNodeId, WorldResource>>,
    /// `inventory` section.
    pub inventory: Arc<BTreeMap<AgentId, Inventory>>,
    /// `socialGraph` section.
    pub social_graph: Arc<BTreeMap<AgentId, SocialTies>>,
    /// `market` section.
    pub market: Arc<BTreeMap<String, MarketEntry>>,
}

impl SnapshotState {
    /// Deep-copy every field of the live state.
    pub fn full_clone(state: &WorldState) -> Self {
        Self {
            time: state.time,
            cycles: state.cycles,
            weather: state.weather,
            resource_totals: state.resource_totals.clone(),
            agents: Arc::new(state.agents.clone()),
            entities: Arc::new(state.entities.clone()),
            animals: Arc::new(state.animals.clone()),
            zones: Arc::new(state.zones.clone()),
            world_resources: Arc::new(state.world_resources.clone()),
            inventory: Arc::new(state.inventory.clone()),
            social_graph: Arc::new(state.social_graph.clone()),
            market: Arc::new(state.market.clone()),
        }
    }

    /// Whether `self` and `other` share the same allocation for `section`.
    pub fn shares_section(&self, other: &Self, section: StateSection) -> bool {
        match section {
            StateSection::Agents => Arc::ptr_eq(&self.agents, &other.agents),
            StateSection::Entities => Arc::ptr_eq(&self.entities, &other.entities),
            StateSection::Animals => Arc::ptr_eq(&self.animals, &other.animals),
            StateSection::Zones => Arc::ptr_eq(&self.zones, &other.zones),
            StateSection::WorldResources => {
                Arc::ptr_eq(&self.world_resources, &other.world_resources)
            }
            StateSection::Inventory => Arc::ptr_eq(&self.inventory, &other.inventory),
            StateSection::SocialGraph => Arc::ptr_eq(&self.social_graph, &other.social_graph),
            StateSection::Market => Arc::ptr_eq(&self.market, &other.market),
        }
    }
}

/// A snapshot ready for delta encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// FAST tick the snapshot was taken at.
    pub tick: u64,
    /// Wall-clock time the snapshot was built.
    pub updated_at: DateTime<Utc>,
    /// World view.
    pub state: SnapshotState,
    /// Per-entity enrichment.
    pub transient: TransientFields,
    /// Events raised since the previous snapshot, oldest first.
    pub events: Vec<SimEvent>,
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// Changes to one keyed section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MapDelta<K, V> {
    /// Entries that are new or whose value changed.
    pub upserted: BTreeMap<K, V>,
    /// Keys that no longer exist.
    pub removed: Vec<K>,
}

impl<K, V> MapDelta<K, V> {
    /// Whether the delta carries no change.
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

impl<K, V> Default for MapDelta<K, V> {
    fn default() -> Self {
        Self {
            upserted: BTreeMap::new(),
            removed: Vec::new(),
        }
    }
}

/// Scalar fields that changed. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ScalarChanges {
    /// New calendar time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<WorldTime>,
    /// New cycle count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u64>,
    /// New weather.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    /// New resource totals (sent whole).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_totals: Option<BTreeMap<String, u64>>,
}

impl ScalarChanges {
    /// Whether no scalar changed.
    pub const fn is_empty(&self) -> bool {
        self.time.is_none()
            && self.cycles.is_none()
            && self.weather.is_none()
            && self.resource_totals.is_none()
    }
}

/// Per-section changes. `None` means the section is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct SectionDeltas {
    /// `agents` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<MapDelta<AgentId, Agent>>,
    /// `entities` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<MapDelta<EntityId, Entity>>,
    /// `animals` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animals: Option<MapDelta<AnimalId, Animal>>,
    /// `zones` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<MapDelta<ZoneId, Zone>>,
    /// `worldResources` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_resources: Option<MapDelta<ResourceNodeId, WorldResource>>,
    /// `inventory` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<MapDelta<AgentId, Inventory>>,
    /// `socialGraph` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_graph: Option<MapDelta<AgentId, SocialTies>>,
    /// `market` changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<MapDelta<String, MarketEntry>>,
}

impl SectionDeltas {
    /// Whether no section changed.
    pub const fn is_empty(&self) -> bool {
        self.agents.is_none()
            && self.entities.is_none()
            && self.animals.is_none()
            && self.zones.is_none()
            && self.world_resources.is_none()
            && self.inventory.is_none()
            && self.social_graph.is_none()
            && self.market.is_none()
    }

    /// Sections present in this delta, in canonical order.
    pub fn changed_sections(&self) -> Vec<StateSection> {
        let flags = [
            (StateSection::Agents, self.agents.is_some()),
            (StateSection::Entities, self.entities.is_some()),
            (StateSection::Animals, self.animals.is_some()),
            (StateSection::Zones, self.zones.is_some()),
            (StateSection::WorldResources, self.world_resources.is_some()),
            (StateSection::Inventory, self.inventory.is_some()),
            (StateSection::SocialGraph, self.social_graph.is_some()),
            (StateSection::Market, self.market.is_some()),
        ];
        flags
            .into_iter()
            .filter_map(|(section, changed)| changed.then_some(section))
            .collect()
    }
}

/// Wire-efficient difference between two successive snapshots.
///
/// A keyframe carries every section in full (every entry in `upserted`)
/// and tells the receiver to replace its copy instead of patching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDelta {
    /// FAST tick the delta brings the receiver to.
    pub tick: u64,
    /// Wall-clock time the snapshot was built.
    pub updated_at: DateTime<Utc>,
    /// Whether this delta replaces all previous state.
    pub keyframe: bool,
    /// Changed scalars.
    pub scalars: ScalarChanges,
    /// Changed sections.
    pub sections: SectionDeltas,
    /// Changed transient fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient: Option<MapDelta<String, serde_json::Value>>,
    /// Events raised since the previous delta.
    pub events: Vec<SimEvent>,
}
