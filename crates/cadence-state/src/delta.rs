//! Snapshot-to-snapshot delta encoding.
//!
//! [`DeltaEncoder`] remembers the last snapshot it saw and reports only
//! what changed since: scalars that differ, per-section upserts and
//! removals, transient field changes and the events carried by the new
//! snapshot. Sections that are still the same `Arc` as last time are
//! skipped without looking inside.
//!
//! # Keyframes
//!
//! The first encode, the first encode after [`DeltaEncoder::reset`], and
//! every `keyframe_interval`-th delta after that is a keyframe: every
//! section and every transient field in full. A receiver that missed
//! deltas can resynchronize on the next keyframe. An interval of 0
//! disables periodic keyframes.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_types::{
    MapDelta, ScalarChanges, SectionDeltas, Snapshot, SnapshotDelta, SnapshotState,
};
use tracing::debug;

/// Stateful delta encoder.
#[derive(Debug)]
pub struct DeltaEncoder {
    keyframe_interval: u64,
    since_keyframe: u64,
    last: Option<Snapshot>,
}

impl DeltaEncoder {
    /// An encoder emitting a keyframe every `keyframe_interval` deltas.
    pub const fn new(keyframe_interval: u64) -> Self {
        Self {
            keyframe_interval,
            since_keyframe: 0,
            last: None,
        }
    }

    /// Diff `snapshot` against the previous one.
    ///
    /// Returns `None` when nothing changed and no events are pending. A
    /// periodic keyframe that falls due on an unchanged snapshot is held
    /// back until the next change.
    pub fn encode_delta(&mut self, snapshot: &Snapshot) -> Option<SnapshotDelta> {
        let delta = self.last.as_ref().map_or_else(
            || Some(keyframe(snapshot)),
            |previous| {
                let delta = diff(previous, snapshot);
                if delta_is_empty(&delta) {
                    None
                } else if self.keyframe_due() {
                    Some(keyframe(snapshot))
                } else {
                    Some(delta)
                }
            },
        );

        self.last = Some(snapshot.clone());

        let delta = delta?;
        if delta.keyframe {
            self.since_keyframe = 0;
            debug!(
                tick = delta.tick,
                entries = snapshot_entries(&snapshot.state),
                "Keyframe encoded"
            );
        } else {
            self.since_keyframe = self.since_keyframe.saturating_add(1);
        }
        Some(delta)
    }

    /// Forget the last snapshot so the next encode is a keyframe.
    pub fn reset(&mut self) {
        self.last = None;
        self.since_keyframe = 0;
    }

    /// The last snapshot this encoder saw.
    pub const fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    const fn keyframe_due(&self) -> bool {
        self.keyframe_interval > 0
            && self.since_keyframe.saturating_add(1) >= self.keyframe_interval
    }
}

const fn delta_is_empty(delta: &SnapshotDelta) -> bool {
    delta.scalars.is_empty()
        && delta.sections.is_empty()
        && delta.transient.is_none()
        && delta.events.is_empty()
}

fn snapshot_entries(state: &SnapshotState) -> usize {
    [
        state.agents.len(),
        state.entities.len(),
        state.animals.len(),
        state.zones.len(),
        state.world_resources.len(),
        state.inventory.len(),
        state.social_graph.len(),
        state.market.len(),
    ]
    .into_iter()
    .fold(0, usize::saturating_add)
}

fn keyframe(snapshot: &Snapshot) -> SnapshotDelta {
    let state = &snapshot.state;
    SnapshotDelta {
        tick: snapshot.tick,
        updated_at: snapshot.updated_at,
        keyframe: true,
        scalars: ScalarChanges {
            time: Some(state.time),
            cycles: Some(state.cycles),
            weather: Some(state.weather),
            resource_totals: Some(state.resource_totals.clone()),
        },
        sections: SectionDeltas {
            agents: Some(full(&state.agents)),
            entities: Some(full(&state.entities)),
            animals: Some(full(&state.animals)),
            zones: Some(full(&state.zones)),
            world_resources: Some(full(&state.world_resources)),
            inventory: Some(full(&state.inventory)),
            social_graph: Some(full(&state.social_graph)),
            market: Some(full(&state.market)),
        },
        transient: Some(MapDelta {
            upserted: snapshot.transient.clone(),
            removed: Vec::new(),
        }),
        events: snapshot.events.clone(),
    }
}

fn diff(previous: &Snapshot, next: &Snapshot) -> SnapshotDelta {
    let (old, new) = (&previous.state, &next.state);
    SnapshotDelta {
        tick: next.tick,
        updated_at: next.updated_at,
        keyframe: false,
        scalars: ScalarChanges {
            time: (old.time != new.time).then_some(new.time),
            cycles: (old.cycles != new.cycles).then_some(new.cycles),
            weather: (old.weather != new.weather).then_some(new.weather),
            resource_totals: (old.resource_totals != new.resource_totals)
                .then(|| new.resource_totals.clone()),
        },
        sections: SectionDeltas {
            agents: diff_section(&old.agents, &new.agents),
            entities: diff_section(&old.entities, &new.entities),
            animals: diff_section(&old.animals, &new.animals),
            zones: diff_section(&old.zones, &new.zones),
            world_resources: diff_section(&old.world_resources, &new.world_resources),
            inventory: diff_section(&old.inventory, &new.inventory),
            social_graph: diff_section(&old.social_graph, &new.social_graph),
            market: diff_section(&old.market, &new.market),
        },
        transient: diff_map(&previous.transient, &next.transient),
        events: next.events.clone(),
    }
}

fn full<K, V>(section: &BTreeMap<K, V>) -> MapDelta<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    MapDelta {
        upserted: section.clone(),
        removed: Vec::new(),
    }
}

fn diff_section<K, V>(
    old: &Arc<BTreeMap<K, V>>,
    new: &Arc<BTreeMap<K, V>>,
) -> Option<MapDelta<K, V>>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    if Arc::ptr_eq(old, new) {
        return None;
    }
    diff_map(old, new)
}

fn diff_map<K, V>(old: &BTreeMap<K, V>, new: &BTreeMap<K, V>) -> Option<MapDelta<K, V>>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    let upserted: BTreeMap<K, V> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let removed: Vec<K> = old
        .keys()
        .filter(|key| !new.contains_key(*key))
        .cloned()
        .collect();
    let delta = MapDelta { upserted, removed };
    (!delta.is_empty()).then_some(delta)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use cadence_types::{
        Agent, AgentId, MarketEntry, Position, SimEvent, StateSection, TransientFields, Weather,
        WorldState,
    };

    use super::*;
    use crate::{StateCache, TrackedWorld};

    fn agent(name: &str) -> Agent {
        Agent {
            id: AgentId::new(),
            name: name.to_owned(),
            position: Position::default(),
            zone_id: None,
            health: 100,
            hunger: 0,
            energy: 100,
            alive: true,
        }
    }

    fn snapshot(state: SnapshotState, tick: u64) -> Snapshot {
        Snapshot {
            tick,
            updated_at: Utc::now(),
            state,
            transient: TransientFields::new(),
            events: Vec::new(),
        }
    }

    struct Harness {
        world: TrackedWorld,
        cache: StateCache,
        encoder: DeltaEncoder,
        tick: u64,
    }

    impl Harness {
        fn new(keyframe_interval: u64) -> Self {
            let world = TrackedWorld::new(WorldState::default());
            let cache = StateCache::new(Arc::clone(world.tracker()));
            Self {
                world,
                cache,
                encoder: DeltaEncoder::new(keyframe_interval),
                tick: 0,
            }
        }

        fn encode(&mut self) -> Option<SnapshotDelta> {
            self.tick += 1;
            let state = self.cache.get_snapshot(self.world.state(), self.tick);
            self.encoder.encode_delta(&snapshot(state, self.tick))
        }
    }

    #[test]
    fn first_encode_is_a_keyframe() {
        let mut h = Harness::new(0);
        let a = agent("Ada");
        h.world.agents_mut().insert(a.id, a);
        let delta = h.encode().unwrap();
        assert!(delta.keyframe);
        assert_eq!(delta.sections.changed_sections().len(), StateSection::ALL.len());
        assert_eq!(delta.sections.agents.unwrap().upserted.len(), 1);
        assert_eq!(delta.scalars.weather, Some(Weather::Clear));
    }

    #[test]
    fn unchanged_snapshot_yields_none() {
        let mut h = Harness::new(0);
        assert!(h.encode().is_some());
        assert!(h.encode().is_none());
        assert!(h.encode().is_none());
    }

    #[test]
    fn reports_only_changed_entries() {
        let mut h = Harness::new(0);
        let (a, b) = (agent("Ada"), agent("Bo"));
        let (a_id, b_id) = (a.id, b.id);
        h.world.agents_mut().insert(a.id, a);
        h.world.agents_mut().insert(b.id, b);
        h.encode();

        h.world.agents_mut().get_mut(&a_id).unwrap().hunger = 40;
        let delta = h.encode().unwrap();
        assert!(!delta.keyframe);
        assert_eq!(delta.sections.changed_sections(), vec![StateSection::Agents]);
        let agents = delta.sections.agents.unwrap();
        assert_eq!(agents.upserted.keys().copied().collect::<Vec<_>>(), vec![a_id]);
        assert!(agents.removed.is_empty());

        h.world.agents_mut().remove(&b_id);
        let agents = h.encode().unwrap().sections.agents.unwrap();
        assert!(agents.upserted.is_empty());
        assert_eq!(agents.removed, vec![b_id]);
    }

    #[test]
    fn flagged_but_unchanged_section_is_omitted() {
        let mut h = Harness::new(0);
        h.encode();
        let _ = h.world.market_mut();
        assert!(h.encode().is_none());
    }

    #[test]
    fn scalar_changes_are_reported() {
        let mut h = Harness::new(0);
        h.encode();
        *h.world.weather_mut() = Weather::Snow;
        let delta = h.encode().unwrap();
        assert_eq!(delta.scalars.weather, Some(Weather::Snow));
        assert!(delta.scalars.time.is_none());
        assert!(delta.sections.is_empty());
    }

    #[test]
    fn market_price_changes_are_diffed() {
        let mut h = Harness::new(0);
        h.world.market_mut().insert(
            "bread".to_owned(),
            MarketEntry {
                price: Decimal::new(250, 2),
                supply: 10,
                demand: 4,
            },
        );
        h.encode();
        h.world.market_mut().get_mut("bread").unwrap().price = Decimal::new(275, 2);
        let market = h.encode().unwrap().sections.market.unwrap();
        assert_eq!(market.upserted["bread"].price, Decimal::new(275, 2));
    }

    #[test]
    fn events_alone_produce_a_delta() {
        let mut encoder = DeltaEncoder::new(0);
        let state = SnapshotState::full_clone(&WorldState::default());
        encoder.encode_delta(&snapshot(state.clone(), 1));
        let mut next = snapshot(state, 2);
        next.events.push(SimEvent::new(2, "agent_born", json!({"name": "Cy"})));
        let delta = encoder.encode_delta(&next).unwrap();
        assert_eq!(delta.events.len(), 1);
        assert!(delta.sections.is_empty());
    }

    #[test]
    fn transient_changes_are_diffed() {
        let mut encoder = DeltaEncoder::new(0);
        let state = SnapshotState::full_clone(&WorldState::default());
        let mut first = snapshot(state.clone(), 1);
        first.transient.insert("a".to_owned(), json!({"goal": "eat"}));
        first.transient.insert("b".to_owned(), json!({"goal": "sleep"}));
        encoder.encode_delta(&first);

        let mut second = snapshot(state, 2);
        second.transient.insert("a".to_owned(), json!({"goal": "work"}));
        let transient = encoder.encode_delta(&second).unwrap().transient.unwrap();
        assert_eq!(transient.upserted["a"], json!({"goal": "work"}));
        assert_eq!(transient.removed, vec!["b".to_owned()]);
    }

    #[test]
    fn periodic_keyframes() {
        let mut h = Harness::new(3);
        assert!(h.encode().unwrap().keyframe);
        let mut kinds = Vec::new();
        for _ in 0..6 {
            h.world.time_mut().advance(1);
            kinds.push(h.encode().unwrap().keyframe);
        }
        assert_eq!(kinds, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn reset_forces_keyframe() {
        let mut h = Harness::new(0);
        h.encode();
        h.encoder.reset();
        assert!(h.encoder.last_snapshot().is_none());
        assert!(h.encode().unwrap().keyframe);
    }
}
