//! Enumeration types shared across the Cadence workspace.
//!
//! Covers scheduler rate buckets, cache invalidation scopes, the tracked
//! world-state sections and the weather scalar.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Tick rates
// ---------------------------------------------------------------------------

/// One of the three independent scheduler frequencies.
///
/// The label form (`FAST`, `MEDIUM`, `SLOW`) is part of the metrics
/// compatibility surface and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "UPPERCASE")]
pub enum TickRate {
    /// High-frequency bucket (movement, needs, combat).
    Fast,
    /// Mid-frequency bucket (economy, social).
    Medium,
    /// Low-frequency bucket (weather, lifecycle, governance).
    Slow,
}

impl TickRate {
    /// Every rate, in the order metrics and stats are reported.
    pub const ALL: [Self; 3] = [Self::Fast, Self::Medium, Self::Slow];

    /// Metric label for this rate.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "FAST",
            Self::Medium => "MEDIUM",
            Self::Slow => "SLOW",
        }
    }
}

impl core::fmt::Display for TickRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cache scopes
// ---------------------------------------------------------------------------

/// A named cache-invalidation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// Terrain, weather and other world-level data.
    World,
    /// Agent-derived indices.
    Agents,
    /// Resource node and stockpile indices.
    Resources,
    /// Zone membership and spatial indices.
    Zones,
    /// Everything at once.
    All,
}

impl CacheScope {
    /// Every scope, including [`CacheScope::All`].
    pub const ALL: [Self; 5] = [
        Self::World,
        Self::Agents,
        Self::Resources,
        Self::Zones,
        Self::All,
    ];

    /// Wire name of the scope.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::World => "world",
            Self::Agents => "agents",
            Self::Resources => "resources",
            Self::Zones => "zones",
            Self::All => "all",
        }
    }
}

impl core::fmt::Display for CacheScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State sections
// ---------------------------------------------------------------------------

/// A named top-level slice of world state tracked for dirtiness.
///
/// Only these sections are shared by reference between snapshots. The
/// scalar fields of the world (time, cycles, weather, resource totals) are
/// cloned on every snapshot and therefore have no section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub enum StateSection {
    /// `agents` section.
    Agents,
    /// `entities` section.
    Entities,
    /// `animals` section.
    Animals,
    /// `zones` section.
    Zones,
    /// `worldResources` section.
    WorldResources,
    /// `inventory` section.
    Inventory,
    /// `socialGraph` section.
    SocialGraph,
    /// `market` section.
    Market,
}

impl StateSection {
    /// Every tracked section.
    pub const ALL: [Self; 8] = [
        Self::Agents,
        Self::Entities,
        Self::Animals,
        Self::Zones,
        Self::WorldResources,
        Self::Inventory,
        Self::SocialGraph,
        Self::Market,
    ];

    /// Wire name of the section.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Entities => "entities",
            Self::Animals => "animals",
            Self::Zones => "zones",
            Self::WorldResources => "worldResources",
            Self::Inventory => "inventory",
            Self::SocialGraph => "socialGraph",
            Self::Market => "market",
        }
    }
}

impl core::fmt::Display for StateSection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Current weather over the whole map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    /// No precipitation.
    #[default]
    Clear,
    /// Overcast.
    Cloudy,
    /// Rain.
    Rain,
    /// Thunderstorm.
    Storm,
    /// Snowfall.
    Snow,
}
