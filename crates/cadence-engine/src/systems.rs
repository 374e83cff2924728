//! Demonstration gameplay systems.
//!
//! Small, deliberately simple rules that keep the world moving so the
//! scheduler, snapshot pipeline and cache bus have something to do:
//!
//! | System           | Rate   | Touches                                    |
//! |------------------|--------|--------------------------------------------|
//! | `clock`          | FAST   | time, cycles                               |
//! | `needs`          | FAST   | agents, inventory                          |
//! | `forage`         | MEDIUM | world resources, inventory, totals         |
//! | `economy`        | MEDIUM | market                                     |
//! | `social`         | MEDIUM | social graph (needs 3 entities)            |
//! | `weather`        | SLOW   | weather, `world` cache scope               |
//! | `resource_regen` | SLOW   | world resources, totals, `resources` scope |
//!
//! Every system reads first and only takes a section's mutable accessor
//! when it will actually change something, so idle sections stay clean.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_core::{
    CacheBus, GameSystem, MultiRateScheduler, ScheduledSystem, SystemError, SystemUpdate,
};
use cadence_state::TrackedWorld;
use cadence_types::{
    AgentId, CacheScope, MarketEntry, SnapshotState, TickRate, TransientFields, Weather,
    WorldState,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use tracing::{debug, info};

use crate::seed::{FOOD, resource_totals};
use crate::world::SharedWorld;

/// Real milliseconds per in-world minute.
const MS_PER_GAME_MINUTE: f64 = 250.0;

/// Real milliseconds between two needs steps.
const NEEDS_STEP_MS: f64 = 1000.0;

/// Hunger gained per needs step.
const HUNGER_PER_STEP: u32 = 2;

/// Hunger at which an agent eats if it carries food.
const EAT_THRESHOLD: u32 = 60;

/// Hunger removed by one meal.
const MEAL: u32 = 30;

/// Health lost per needs step while starving.
const STARVATION_DAMAGE: u32 = 5;

/// Needs cap.
const MAX_NEED: u32 = 100;

/// Food an agent forages up to.
const FORAGE_TARGET: u32 = 5;

/// Units of each good a living agent demands.
const DEMAND_PER_AGENT: u32 = 2;

/// Affinity gained per social pass by zone mates.
const AFFINITY_STEP: i32 = 1;

/// Affinity bounds.
const MAX_AFFINITY: i32 = 100;

/// Entities required before the social system runs.
const SOCIAL_MIN_ENTITIES: usize = 3;

/// Chance per SLOW pass that the weather changes.
const WEATHER_CHANGE_CHANCE: f64 = 0.25;

const WEATHERS: [Weather; 5] = [
    Weather::Clear,
    Weather::Cloudy,
    Weather::Rain,
    Weather::Storm,
    Weather::Snow,
];

/// Register every demo system on `scheduler`.
pub fn register_all(
    scheduler: &MultiRateScheduler,
    shared: &Arc<SharedWorld>,
    cache_bus: &Arc<CacheBus>,
    seed: u64,
) {
    let systems = [
        ScheduledSystem::new("clock", TickRate::Fast, ClockSystem::new(Arc::clone(shared))),
        ScheduledSystem::new("needs", TickRate::Fast, NeedsSystem::new(Arc::clone(shared))),
        ScheduledSystem::new("forage", TickRate::Medium, ForageSystem::new(Arc::clone(shared))),
        ScheduledSystem::new("economy", TickRate::Medium, EconomySystem::new(Arc::clone(shared))),
        ScheduledSystem::new("social", TickRate::Medium, SocialSystem::new(Arc::clone(shared)))
            .with_min_entities(SOCIAL_MIN_ENTITIES),
        ScheduledSystem::new(
            "weather",
            TickRate::Slow,
            WeatherSystem::new(Arc::clone(shared), Arc::clone(cache_bus), seed),
        ),
        ScheduledSystem::new(
            "resource_regen",
            TickRate::Slow,
            ResourceRegenSystem::new(Arc::clone(shared), Arc::clone(cache_bus)),
        ),
    ];
    let count = systems.len();
    for system in systems {
        scheduler.register_system(system);
    }
    info!(count, "Demo systems registered");
}

/// Per-agent activity hint attached to every snapshot.
pub fn activity_hints(state: &SnapshotState, _tick: u64, out: &mut TransientFields) {
    for agent in state.agents.values().filter(|a| a.alive) {
        let activity = if agent.hunger >= EAT_THRESHOLD {
            "foraging"
        } else if agent.energy < 20 {
            "resting"
        } else {
            "idle"
        };
        out.insert(agent.id.to_string(), json!({ "activity": activity }));
    }
}

/// Turns accumulated real time into whole steps of `step_ms`.
#[derive(Debug, Default)]
struct Accumulator {
    carry_ms: f64,
}

impl Accumulator {
    fn steps(&mut self, delta_ms: f64, step_ms: f64) -> u32 {
        if step_ms <= 0.0 {
            return 0;
        }
        self.carry_ms += delta_ms.max(0.0);
        let whole = (self.carry_ms / step_ms).floor();
        self.carry_ms -= whole * step_ms;
        whole_steps(whole)
    }
}

// Non-negative and clamped, so the cast cannot wrap.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_steps(whole: f64) -> u32 {
    whole.clamp(0.0, f64::from(u32::MAX)) as u32
}

// -----------------------------------------------------------------------
// FAST
// -----------------------------------------------------------------------

/// Advances in-world time and counts completed days.
#[derive(Debug)]
pub struct ClockSystem {
    shared: Arc<SharedWorld>,
    elapsed: Accumulator,
}

impl ClockSystem {
    /// Clock over `shared`.
    pub fn new(shared: Arc<SharedWorld>) -> Self {
        Self {
            shared,
            elapsed: Accumulator::default(),
        }
    }
}

impl GameSystem for ClockSystem {
    fn update(&mut self, delta_ms: f64) -> SystemUpdate<'_> {
        let minutes = self.elapsed.steps(delta_ms, MS_PER_GAME_MINUTE);
        if minutes == 0 {
            return SystemUpdate::done();
        }
        self.shared.with_world(|world| {
            let day_before = world.state().time.day;
            world.time_mut().advance(minutes);
            let days = world.state().time.day.saturating_sub(day_before);
            if days > 0 {
                let cycles = world.cycles_mut();
                *cycles = cycles.saturating_add(u64::from(days));
            }
        });
        SystemUpdate::done()
    }
}

/// Hunger, eating and starvation.
#[derive(Debug)]
pub struct NeedsSystem {
    shared: Arc<SharedWorld>,
    elapsed: Accumulator,
}

impl NeedsSystem {
    /// Needs over `shared`.
    pub fn new(shared: Arc<SharedWorld>) -> Self {
        Self {
            shared,
            elapsed: Accumulator::default(),
        }
    }
}

impl GameSystem for NeedsSystem {
    fn update(&mut self, delta_ms: f64) -> SystemUpdate<'_> {
        let steps = self.elapsed.steps(delta_ms, NEEDS_STEP_MS);
        if steps == 0 {
            return SystemUpdate::done();
        }
        let deaths = self.shared.with_world(|world| {
            let mut deaths = Vec::new();
            for _ in 0..steps {
                deaths.extend(needs_step(world));
            }
            deaths
        });
        for (id, name) in deaths {
            info!(agent = %name, "Agent starved");
            let payload = json!({ "agentId": id, "name": name, "cause": "starvation" });
            self.shared.raise("agent_died", payload);
        }
        SystemUpdate::done()
    }
}

/// One needs step. Returns the agents that died.
fn needs_step(world: &mut TrackedWorld) -> Vec<(AgentId, String)> {
    let state = world.state();
    if !state.agents.values().any(|a| a.alive) {
        return Vec::new();
    }
    let eaters: Vec<AgentId> = state
        .agents
        .values()
        .filter(|a| a.alive && a.hunger >= EAT_THRESHOLD)
        .filter(|a| {
            state
                .inventory
                .get(&a.id)
                .and_then(|inv| inv.items.get(FOOD))
                .is_some_and(|n| *n > 0)
        })
        .map(|a| a.id)
        .collect();

    if !eaters.is_empty() {
        let inventory = world.inventory_mut();
        for id in &eaters {
            if let Some(food) = inventory.get_mut(id).and_then(|inv| inv.items.get_mut(FOOD)) {
                *food = food.saturating_sub(1);
            }
        }
    }

    let mut deaths = Vec::new();
    for agent in world.agents_mut().values_mut().filter(|a| a.alive) {
        if eaters.contains(&agent.id) {
            agent.hunger = agent.hunger.saturating_sub(MEAL);
        }
        agent.hunger = agent.hunger.saturating_add(HUNGER_PER_STEP).min(MAX_NEED);
        agent.energy = agent.energy.saturating_sub(1);
        if agent.hunger >= MAX_NEED {
            agent.health = agent.health.saturating_sub(STARVATION_DAMAGE);
        }
        if agent.health == 0 {
            agent.alive = false;
            deaths.push((agent.id, agent.name.clone()));
        }
    }
    deaths
}

// -----------------------------------------------------------------------
// MEDIUM
// -----------------------------------------------------------------------

/// Agents pick food from nodes in their zone.
#[derive(Debug)]
pub struct ForageSystem {
    shared: Arc<SharedWorld>,
}

impl ForageSystem {
    /// Foraging over `shared`.
    pub const fn new(shared: Arc<SharedWorld>) -> Self {
        Self { shared }
    }
}

impl GameSystem for ForageSystem {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        let picked = self.shared.with_world(forage_pass);
        if picked > 0 {
            debug!(picked, "Food foraged");
        }
        SystemUpdate::done()
    }
}

/// One forage pass. Returns the number of units picked.
fn forage_pass(world: &mut TrackedWorld) -> u32 {
    let state = world.state();
    let mut picks = Vec::new();
    let mut stock: BTreeMap<_, u32> = state
        .world_resources
        .values()
        .filter(|node| node.resource == FOOD && node.amount > 0)
        .map(|node| (node.id, node.amount))
        .collect();

    for agent in state.agents.values().filter(|a| a.alive) {
        let carried = state
            .inventory
            .get(&agent.id)
            .and_then(|inv| inv.items.get(FOOD))
            .copied()
            .unwrap_or(0);
        if carried >= FORAGE_TARGET {
            continue;
        }
        let node = state
            .world_resources
            .values()
            .filter(|node| node.resource == FOOD && node.zone_id == agent.zone_id)
            .find(|node| stock.get(&node.id).is_some_and(|left| *left > 0));
        if let Some(node) = node {
            if let Some(left) = stock.get_mut(&node.id) {
                *left = left.saturating_sub(1);
            }
            picks.push((agent.id, node.id));
        }
    }

    if picks.is_empty() {
        return 0;
    }
    let resources = world.world_resources_mut();
    for (_, node_id) in &picks {
        if let Some(node) = resources.get_mut(node_id) {
            node.amount = node.amount.saturating_sub(1);
        }
    }
    let totals = resource_totals(resources);
    *world.resource_totals_mut() = totals;

    let inventory = world.inventory_mut();
    for (agent_id, _) in &picks {
        let food = inventory
            .entry(*agent_id)
            .or_default()
            .items
            .entry(FOOD.to_owned())
            .or_default();
        *food = food.saturating_add(1);
    }
    u32::try_from(picks.len()).unwrap_or(u32::MAX)
}

/// Moves market prices with supply and demand.
#[derive(Debug)]
pub struct EconomySystem {
    shared: Arc<SharedWorld>,
}

impl EconomySystem {
    /// Economy over `shared`.
    pub const fn new(shared: Arc<SharedWorld>) -> Self {
        Self { shared }
    }
}

impl GameSystem for EconomySystem {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        self.shared.with_world(|world| {
            let updated = reprice(world.state());
            if !updated.is_empty() {
                let market = world.market_mut();
                for (good, entry) in updated {
                    market.insert(good, entry);
                }
            }
        });
        SystemUpdate::done()
    }
}

/// Entries whose supply, demand or price would change.
fn reprice(state: &WorldState) -> Vec<(String, MarketEntry)> {
    let living =
        u32::try_from(state.agents.values().filter(|a| a.alive).count()).unwrap_or(u32::MAX);
    let demand = living.saturating_mul(DEMAND_PER_AGENT);
    let step_up = Decimal::new(105, 2);
    let step_down = Decimal::new(95, 2);
    let floor = Decimal::new(1, 2);

    state
        .market
        .iter()
        .filter_map(|(good, entry)| {
            let supply = state
                .resource_totals
                .get(good)
                .map_or(0, |total| u32::try_from(*total).unwrap_or(u32::MAX));
            let factor = match demand.cmp(&supply) {
                core::cmp::Ordering::Greater => Some(step_up),
                core::cmp::Ordering::Less => Some(step_down),
                core::cmp::Ordering::Equal => None,
            };
            let price = factor
                .and_then(|f| entry.price.checked_mul(f))
                .map_or(entry.price, |p| {
                    p.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                        .max(floor)
                });
            let next = MarketEntry {
                price,
                supply,
                demand,
            };
            (next != *entry).then(|| (good.clone(), next))
        })
        .collect()
}

/// Zone mates grow fond of each other.
#[derive(Debug)]
pub struct SocialSystem {
    shared: Arc<SharedWorld>,
}

impl SocialSystem {
    /// Social ties over `shared`.
    pub const fn new(shared: Arc<SharedWorld>) -> Self {
        Self { shared }
    }
}

impl GameSystem for SocialSystem {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        self.shared.with_world(|world| {
            let state = world.state();
            let pairs: Vec<(AgentId, AgentId)> = state
                .zones
                .values()
                .flat_map(|zone| {
                    let mates: Vec<AgentId> = zone
                        .occupants
                        .iter()
                        .filter(|id| state.agents.get(id).is_some_and(|a| a.alive))
                        .copied()
                        .collect();
                    mates
                        .iter()
                        .flat_map(|a| {
                            mates
                                .iter()
                                .filter(move |b| *b != a)
                                .map(move |b| (*a, *b))
                        })
                        .collect::<Vec<_>>()
                })
                .filter(|(from, to)| {
                    state
                        .social_graph
                        .get(from)
                        .and_then(|ties| ties.affinity.get(to))
                        .is_none_or(|v| *v < MAX_AFFINITY)
                })
                .collect();
            if pairs.is_empty() {
                return;
            }
            let graph = world.social_graph_mut();
            for (from, to) in pairs {
                let affinity = graph.entry(from).or_default().affinity.entry(to).or_insert(0);
                *affinity = affinity.saturating_add(AFFINITY_STEP).min(MAX_AFFINITY);
            }
        });
        SystemUpdate::done()
    }
}

// -----------------------------------------------------------------------
// SLOW
// -----------------------------------------------------------------------

/// Seeded random weather changes.
#[derive(Debug)]
pub struct WeatherSystem {
    shared: Arc<SharedWorld>,
    cache_bus: Arc<CacheBus>,
    rng: StdRng,
}

impl WeatherSystem {
    /// Weather over `shared`, reproducible for a given `seed`.
    pub fn new(shared: Arc<SharedWorld>, cache_bus: Arc<CacheBus>, seed: u64) -> Self {
        Self {
            shared,
            cache_bus,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn roll(&mut self, current: Weather) -> Option<Weather> {
        if !self.rng.random_bool(WEATHER_CHANGE_CHANCE) {
            return None;
        }
        let options: Vec<Weather> = WEATHERS.into_iter().filter(|w| *w != current).collect();
        let idx = self.rng.random_range(0..options.len());
        options.get(idx).copied()
    }
}

impl GameSystem for WeatherSystem {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        let current = self.shared.with_world(|world| world.state().weather);
        let Some(next) = self.roll(current) else {
            return SystemUpdate::done();
        };
        self.shared.with_world(|world| *world.weather_mut() = next);
        self.cache_bus
            .invalidate(CacheScope::World, Some("weather changed"));
        self.shared
            .raise("weather_changed", json!({ "from": current, "to": next }));
        info!(from = ?current, to = ?next, "Weather changed");
        SystemUpdate::done()
    }
}

/// Resource nodes grow back towards their maximum.
#[derive(Debug)]
pub struct ResourceRegenSystem {
    shared: Arc<SharedWorld>,
    cache_bus: Arc<CacheBus>,
}

impl ResourceRegenSystem {
    /// Regeneration over `shared`.
    pub const fn new(shared: Arc<SharedWorld>, cache_bus: Arc<CacheBus>) -> Self {
        Self { shared, cache_bus }
    }
}

impl GameSystem for ResourceRegenSystem {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        let regenerated = self.shared.with_world(|world| -> Result<u32, SystemError> {
            let growing = world
                .state()
                .world_resources
                .values()
                .any(|n| n.amount < n.max_amount && n.regen_per_pass > 0);
            if !growing {
                return Ok(0);
            }
            let mut added: u32 = 0;
            let resources = world.world_resources_mut();
            for node in resources.values_mut() {
                let headroom = node.max_amount.saturating_sub(node.amount);
                let step = node.regen_per_pass.min(headroom);
                node.amount = node.amount.checked_add(step).ok_or_else(|| {
                    SystemError::Failed(format!("resource node {} overflowed", node.id))
                })?;
                added = added.saturating_add(step);
            }
            let totals = resource_totals(resources);
            *world.resource_totals_mut() = totals;
            Ok(added)
        });
        match regenerated {
            Ok(0) => {}
            Ok(added) => {
                self.cache_bus
                    .invalidate(CacheScope::Resources, Some("regeneration"));
                debug!(added, "Resources regenerated");
            }
            Err(e) => return SystemUpdate::Ready(Err(e)),
        }
        SystemUpdate::done()
    }
}
