//! Live world state and the records held by each tracked section.
//!
//! [`WorldState`] is the authoritative, mutable state owned by the
//! simulation. Each tracked section is a keyed map so it can be diffed
//! entry by entry; the scalar fields are small and change almost every
//! tick.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{StateSection, Weather};
use crate::ids::{AgentId, AnimalId, EntityId, ResourceNodeId, ZoneId};

/// Minutes in one in-world hour.
const MINUTES_PER_HOUR: u32 = 60;

/// Hours in one in-world day.
const HOURS_PER_DAY: u32 = 24;

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// In-world calendar time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldTime {
    /// Day counter, starting at 0.
    pub day: u32,
    /// Hour of the day (0-23).
    pub hour: u32,
    /// Minute of the hour (0-59).
    pub minute: u32,
}

impl WorldTime {
    /// Advance the clock by `minutes`, rolling hours and days over.
    ///
    /// The day counter saturates at `u32::MAX`.
    pub fn advance(&mut self, minutes: u32) {
        let total = self.minute.saturating_add(minutes);
        let carry_hours = total.checked_div(MINUTES_PER_HOUR).unwrap_or(0);
        self.minute = total.checked_rem(MINUTES_PER_HOUR).unwrap_or(0);

        let hours = self.hour.saturating_add(carry_hours);
        let carry_days = hours.checked_div(HOURS_PER_DAY).unwrap_or(0);
        self.hour = hours.checked_rem(HOURS_PER_DAY).unwrap_or(0);
        self.day = self.day.saturating_add(carry_days);
    }
}

/// Integer tile coordinate on the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

// ---------------------------------------------------------------------------
// Section records
// ---------------------------------------------------------------------------

/// A simulated agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Agent {
    /// Agent identifier.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Tile the agent stands on.
    pub position: Position,
    /// Zone the agent is currently in, if any.
    pub zone_id: Option<ZoneId>,
    /// Health (0-100).
    pub health: u32,
    /// Hunger (0 = sated, 100 = starving).
    pub hunger: u32,
    /// Energy (0-100).
    pub energy: u32,
    /// Whether the agent is alive.
    pub alive: bool,
}

/// A generic placed entity (item on the ground, building, prop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Entity {
    /// Entity identifier.
    pub id: EntityId,
    /// Free-form kind tag (`"campfire"`, `"crate"`, ...).
    pub kind: String,
    /// Tile the entity occupies.
    pub position: Position,
    /// Remaining durability.
    pub durability: u32,
}

/// A wild or domesticated animal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Animal {
    /// Animal identifier.
    pub id: AnimalId,
    /// Species name.
    pub species: String,
    /// Tile the animal stands on.
    pub position: Position,
    /// Health (0-100).
    pub health: u32,
}

/// A named region of the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Zone {
    /// Zone identifier.
    pub id: ZoneId,
    /// Display name.
    pub name: String,
    /// Zone purpose (`"residential"`, `"farm"`, `"wild"`, ...).
    pub kind: String,
    /// Maximum number of occupants.
    pub capacity: u32,
    /// Agents currently inside the zone.
    pub occupants: BTreeSet<AgentId>,
}

/// A harvestable resource node placed in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldResource {
    /// Node identifier.
    pub id: ResourceNodeId,
    /// Resource name (`"wood"`, `"stone"`, ...).
    pub resource: String,
    /// Zone the node belongs to, if any.
    pub zone_id: Option<ZoneId>,
    /// Units currently available.
    pub amount: u32,
    /// Upper bound for regeneration.
    pub max_amount: u32,
    /// Units regenerated per regeneration pass.
    pub regen_per_pass: u32,
}

/// The items held by one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Inventory {
    /// Item name to quantity.
    pub items: BTreeMap<String, u32>,
    /// Maximum total quantity carried.
    pub capacity: u32,
}

/// Outgoing social ties of one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SocialTies {
    /// Affinity towards other agents (-100 to 100).
    pub affinity: BTreeMap<AgentId, i32>,
}

/// Market state for one traded good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MarketEntry {
    /// Current unit price.
    #[ts(as = "String")]
    pub price: Decimal,
    /// Units offered for sale.
    pub supply: u32,
    /// Units requested.
    pub demand: u32,
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// The authoritative mutable world state.
///
/// Direct mutation of the tracked sections bypasses dirty tracking; code
/// that changes world state should go through the tracked wrapper in
/// `cadence-state` instead of touching these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    /// In-world calendar time.
    pub time: WorldTime,
    /// Completed day/night cycles.
    pub cycles: u64,
    /// Current weather.
    pub weather: Weather,
    /// Aggregate stock per resource name.
    pub resource_totals: BTreeMap<String, u64>,
    /// Agents keyed by ID.
    pub agents: BTreeMap<AgentId, Agent>,
    /// Placed entities keyed by ID.
    pub entities: BTreeMap<EntityId, Entity>,
    /// Animals keyed by ID.
    pub animals: BTreeMap<AnimalId, Animal>,
    /// Zones keyed by ID.
    pub zones: BTreeMap<ZoneId, Zone>,
    /// Resource nodes keyed by ID.
    pub world_resources: BTreeMap<ResourceNodeId, WorldResource>,
    /// Inventories keyed by owning agent.
    pub inventory: BTreeMap<AgentId, Inventory>,
    /// Social ties keyed by source agent.
    pub social_graph: BTreeMap<AgentId, SocialTies>,
    /// Market entries keyed by good name.
    pub market: BTreeMap<String, MarketEntry>,
}

impl WorldState {
    /// Number of entries in a tracked section.
    pub fn section_len(&self, section: StateSection) -> usize {
        match section {
            StateSection::Agents => self.agents.len(),
            StateSection::Entities => self.entities.len(),
            StateSection::Animals => self.animals.len(),
            StateSection::Zones => self.zones.len(),
            StateSection::WorldResources => self.world_resources.len(),
            StateSection::Inventory => self.inventory.len(),
            StateSection::SocialGraph => self.social_graph.len(),
            StateSection::Market => self.market.len(),
        }
    }

    /// Count of simulated bodies: living agents, animals and entities.
    ///
    /// This is the figure systems gate on through `min_entities`.
    pub fn entity_count(&self) -> usize {
        let living = self.agents.values().filter(|a| a.alive).count();
        living
            .saturating_add(self.animals.len())
            .saturating_add(self.entities.len())
    }
}
