//! Shared services handed to every component at construction time.

use std::sync::Arc;

use crate::cache_bus::CacheBus;
use crate::perf::PerformanceMonitor;

/// Process-wide services with no ambient global state.
///
/// Built once by the composition root and cloned into each consumer.
/// Tests build their own to stay isolated from each other.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    /// Cache invalidation signal.
    pub cache_bus: Arc<CacheBus>,
    /// Timing sink for passes, systems and named operations.
    pub perf: Arc<PerformanceMonitor>,
}

impl AppContext {
    /// Fresh services with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}
