//! Scheduling core for the Cadence simulation engine.
//!
//! # Modules
//!
//! - [`scheduler`] -- Three-rate cooperative scheduler with per-pass hooks
//! - [`system`] -- The [`GameSystem`] contract the scheduler drives
//! - [`cache_bus`] -- Versioned cache invalidation signal
//! - [`perf`] -- Rolling timing statistics and metrics text
//! - [`config`] -- YAML configuration with environment overrides
//! - [`context`] -- Shared services passed to components
//! - [`sync`] -- Poison-tolerant lock helpers

pub mod cache_bus;
pub mod config;
pub mod context;
pub mod perf;
pub mod scheduler;
pub mod sync;
pub mod system;

pub use cache_bus::{CacheBus, CacheBusEvent, CacheInvalidationEvent, SubscriptionId};
pub use config::{ConfigError, SimulationConfig};
pub use context::AppContext;
pub use perf::{PerfSnapshot, PerformanceMonitor, RollingStats};
pub use scheduler::{
    MultiRateScheduler, SchedulerError, SchedulerHooks, SchedulerStats, SystemDescriptor,
    TickRates,
};
pub use system::{GameSystem, ScheduledSystem, SystemError, SystemFuture, SystemUpdate};
