//! Configuration loading and typed config structures for Cadence.
//!
//! The canonical configuration lives in `cadence-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror
//! the YAML structure, and provides a loader that reads and validates the
//! file. Every field has a default, so an empty file is a valid config.

use std::path::Path;
use std::time::Duration;

use cadence_types::TickRate;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `cadence-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    /// World-level settings (name, seed).
    #[serde(default)]
    pub world: WorldConfig,

    /// Scheduler frequencies and budgets.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Snapshot throttling and worker supervision.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics / introspection HTTP surface.
    #[serde(default)]
    pub observer: ObserverConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override a few deployment-specific values:
    /// - `CADENCE_OBSERVER_PORT` overrides `observer.port`
    /// - `CADENCE_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml rejects a document that is empty or only comments.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CADENCE_OBSERVER_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.observer.port = port,
                Err(e) => tracing::warn!(
                    value = %val,
                    error = %e,
                    "ignoring invalid CADENCE_OBSERVER_PORT"
                ),
            }
        }
        if let Ok(val) = std::env::var("CADENCE_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = &self.scheduler.tick_rates;
        for (label, value) in [
            ("fast_ms", rates.fast_ms),
            ("medium_ms", rates.medium_ms),
            ("slow_ms", rates.slow_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("scheduler.tick_rates.{label} must be at least 1"),
                });
            }
        }
        if self.snapshot.min_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "snapshot.min_interval_ms must be at least 1".to_owned(),
            });
        }
        if self.snapshot.worker.initial_backoff_ms > self.snapshot.worker.max_backoff_ms {
            return Err(ConfigError::Invalid {
                reason: "snapshot.worker.initial_backoff_ms exceeds max_backoff_ms".to_owned(),
            });
        }
        Ok(())
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable simulation name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for the demo systems.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Period of each rate bucket.
    #[serde(default)]
    pub tick_rates: TickRatesConfig,

    /// Elapsed time within one pass after which the pass yields once.
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,

    /// Soft budget for a single asynchronous system update; exceeding it
    /// only logs a warning.
    #[serde(default = "default_async_system_budget_ms")]
    pub async_system_budget_ms: u64,

    /// How long a host entity count stays fresh.
    #[serde(default = "default_entity_count_ttl_ms")]
    pub entity_count_ttl_ms: u64,
}

impl SchedulerConfig {
    /// Per-pass budget as a [`Duration`].
    pub const fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    /// Async soft budget as a [`Duration`].
    pub const fn async_system_budget(&self) -> Duration {
        Duration::from_millis(self.async_system_budget_ms)
    }

    /// Entity count TTL as a [`Duration`].
    pub const fn entity_count_ttl(&self) -> Duration {
        Duration::from_millis(self.entity_count_ttl_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rates: TickRatesConfig::default(),
            tick_budget_ms: default_tick_budget_ms(),
            async_system_budget_ms: default_async_system_budget_ms(),
            entity_count_ttl_ms: default_entity_count_ttl_ms(),
        }
    }
}

/// Period of each rate bucket in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TickRatesConfig {
    /// FAST period.
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,
    /// MEDIUM period.
    #[serde(default = "default_medium_ms")]
    pub medium_ms: u64,
    /// SLOW period.
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
}

impl TickRatesConfig {
    /// Period configured for `rate`.
    pub const fn period_ms(&self, rate: TickRate) -> u64 {
        match rate {
            TickRate::Fast => self.fast_ms,
            TickRate::Medium => self.medium_ms,
            TickRate::Slow => self.slow_ms,
        }
    }
}

impl Default for TickRatesConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            medium_ms: default_medium_ms(),
            slow_ms: default_slow_ms(),
        }
    }
}

/// Snapshot generation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Minimum time between two generations that proceed.
    #[serde(default = "default_snapshot_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Maximum events buffered between snapshots; older events are dropped.
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,

    /// Emit a keyframe every N deltas (0 = only the first delta).
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u64,

    /// Serialization worker supervision.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_snapshot_min_interval_ms(),
            max_buffered_events: default_max_buffered_events(),
            keyframe_interval: default_keyframe_interval(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Serialization worker restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Respawns allowed after unexpected exits (0 = degrade immediately).
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before the first respawn.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubling backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Metrics / introspection HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Whether the HTTP surface is started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (required by serde's `default = "..."` attribute)
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "Cadence".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_fast_ms() -> u64 {
    50
}

const fn default_medium_ms() -> u64 {
    250
}

const fn default_slow_ms() -> u64 {
    1000
}

const fn default_tick_budget_ms() -> u64 {
    40
}

const fn default_async_system_budget_ms() -> u64 {
    25
}

const fn default_entity_count_ttl_ms() -> u64 {
    100
}

const fn default_snapshot_min_interval_ms() -> u64 {
    250
}

const fn default_max_buffered_events() -> usize {
    512
}

const fn default_keyframe_interval() -> u64 {
    120
}

const fn default_max_restarts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    9400
}
