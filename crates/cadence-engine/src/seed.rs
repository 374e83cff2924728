//! Starting world for the demo simulation.
//!
//! Three zones, a handful of agents spread across them, some animals and
//! props, resource nodes and a small market. Positions and starting
//! needs are drawn from a [`StdRng`] seeded with `world.seed`, so two
//! runs with the same seed start from the same layout (IDs differ).

use std::collections::{BTreeMap, BTreeSet};

use cadence_core::config::WorldConfig;
use cadence_types::{
    Agent, AgentId, Animal, AnimalId, Entity, EntityId, Inventory, MarketEntry, Position,
    ResourceNodeId, SocialTies, WorldResource, WorldState, Zone, ZoneId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::info;

/// Width and height of the square map in tiles.
const MAP_SIZE: i32 = 32;

/// Food item agents carry and eat.
pub const FOOD: &str = "berries";

/// Starting food per agent.
const STARTING_FOOD: u32 = 3;

/// Agent names, assigned in order.
const NAMES: &[&str] = &["Alder", "Birch", "Cedar", "Ember", "Fern", "Wren"];

// -----------------------------------------------------------------------
// Zones
// -----------------------------------------------------------------------

struct ZoneSpec {
    name: &'static str,
    kind: &'static str,
    capacity: u32,
}

const ZONES: &[ZoneSpec] = &[
    ZoneSpec {
        name: "Hearth",
        kind: "residential",
        capacity: 8,
    },
    ZoneSpec {
        name: "Fields",
        kind: "farm",
        capacity: 6,
    },
    ZoneSpec {
        name: "Thicket",
        kind: "wild",
        capacity: 4,
    },
];

// -----------------------------------------------------------------------
// Resource nodes: (resource, zone index, amount, max, regen per pass)
// -----------------------------------------------------------------------

const NODES: &[(&str, usize, u32, u32, u32)] = &[
    (FOOD, 1, 12, 30, 2),
    (FOOD, 2, 8, 20, 1),
    ("wood", 2, 40, 60, 3),
    ("stone", 0, 25, 25, 0),
];

/// Build the starting world from `config`.
#[allow(clippy::too_many_lines)]
pub fn seed_world(config: &WorldConfig) -> WorldState {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut world = WorldState::default();

    let zone_ids: Vec<ZoneId> = ZONES
        .iter()
        .map(|spec| {
            let id = ZoneId::new();
            world.zones.insert(
                id,
                Zone {
                    id,
                    name: spec.name.to_owned(),
                    kind: spec.kind.to_owned(),
                    capacity: spec.capacity,
                    occupants: BTreeSet::new(),
                },
            );
            id
        })
        .collect();

    for (i, name) in NAMES.iter().enumerate() {
        let id = AgentId::new();
        let zone_id = zone_ids.get(i.checked_rem(zone_ids.len()).unwrap_or(0)).copied();
        if let Some(zone) = zone_id.and_then(|z| world.zones.get_mut(&z)) {
            zone.occupants.insert(id);
        }
        world.agents.insert(
            id,
            Agent {
                id,
                name: (*name).to_owned(),
                position: random_position(&mut rng),
                zone_id,
                health: 100,
                hunger: rng.random_range(0..40),
                energy: rng.random_range(60..=100),
                alive: true,
            },
        );
        world.inventory.insert(
            id,
            Inventory {
                items: BTreeMap::from([(FOOD.to_owned(), STARTING_FOOD)]),
                capacity: 20,
            },
        );
        world.social_graph.insert(id, SocialTies::default());
    }

    for species in ["deer", "rabbit", "fox"] {
        let id = AnimalId::new();
        world.animals.insert(
            id,
            Animal {
                id,
                species: species.to_owned(),
                position: random_position(&mut rng),
                health: 100,
            },
        );
    }

    for kind in ["campfire", "crate"] {
        let id = EntityId::new();
        world.entities.insert(
            id,
            Entity {
                id,
                kind: kind.to_owned(),
                position: random_position(&mut rng),
                durability: 100,
            },
        );
    }

    for &(resource, zone, amount, max_amount, regen_per_pass) in NODES {
        let id = ResourceNodeId::new();
        world.world_resources.insert(
            id,
            WorldResource {
                id,
                resource: resource.to_owned(),
                zone_id: zone_ids.get(zone).copied(),
                amount,
                max_amount,
                regen_per_pass,
            },
        );
    }
    world.resource_totals = resource_totals(&world.world_resources);

    for (good, cents) in [(FOOD, 150), ("wood", 400), ("stone", 650)] {
        world.market.insert(
            good.to_owned(),
            MarketEntry {
                price: Decimal::new(cents, 2),
                supply: 0,
                demand: 0,
            },
        );
    }

    info!(
        world = %config.name,
        seed = config.seed,
        agents = world.agents.len(),
        zones = world.zones.len(),
        resource_nodes = world.world_resources.len(),
        "Seed world created"
    );
    world
}

/// Sum node amounts per resource name.
pub fn resource_totals(
    nodes: &BTreeMap<ResourceNodeId, WorldResource>,
) -> BTreeMap<String, u64> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for node in nodes.values() {
        let total = totals.entry(node.resource.clone()).or_default();
        *total = total.saturating_add(u64::from(node.amount));
    }
    totals
}

fn random_position(rng: &mut StdRng) -> Position {
    Position {
        x: rng.random_range(0..MAP_SIZE),
        y: rng.random_range(0..MAP_SIZE),
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn seed_world_is_populated() {
        let world = seed_world(&WorldConfig::default());
        assert_eq!(world.agents.len(), NAMES.len());
        assert_eq!(world.zones.len(), ZONES.len());
        assert_eq!(world.inventory.len(), NAMES.len());
        assert_eq!(world.entity_count(), NAMES.len() + 3 + 2);

        let occupants: usize = world.zones.values().map(|z| z.occupants.len()).sum();
        assert_eq!(occupants, NAMES.len());
        assert!(world.agents.values().all(|a| a.zone_id.is_some()));
    }

    #[test]
    fn totals_sum_nodes_per_resource() {
        let world = seed_world(&WorldConfig::default());
        assert_eq!(world.resource_totals.get(FOOD).copied(), Some(20));
        assert_eq!(world.resource_totals.get("wood").copied(), Some(40));
        assert_eq!(world.resource_totals.get("stone").copied(), Some(25));
    }

    #[test]
    fn same_seed_same_layout() {
        let config = WorldConfig::default();
        let a = seed_world(&config);
        let b = seed_world(&config);
        let needs = |w: &WorldState| -> Vec<(String, u32, u32, i32, i32)> {
            w.agents
                .values()
                .map(|a| (a.name.clone(), a.hunger, a.energy, a.position.x, a.position.y))
                .collect()
        };
        let mut left = needs(&a);
        let mut right = needs(&b);
        left.sort();
        right.sort();
        assert_eq!(left, right);
    }
}
