//! The gameplay-system contract consumed by the scheduler.
//!
//! Systems never pull ticks themselves. They are registered once with a
//! fixed [`TickRate`] and the scheduler pushes `update(delta_ms)` calls
//! to them. An update either completes synchronously
//! ([`SystemUpdate::Ready`]) or hands back a future the scheduler awaits
//! ([`SystemUpdate::Pending`]).

use cadence_types::TickRate;
use futures::future::BoxFuture;

/// Errors a system may report from an update.
///
/// The scheduler logs them with the system name and carries on with the
/// rest of the pass; they never propagate further.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// The update could not be completed.
    #[error("{0}")]
    Failed(String),

    /// Shared state the system needs could not be accessed.
    #[error("state unavailable: {0}")]
    StateUnavailable(String),
}

/// Future returned by an asynchronous update.
pub type SystemFuture<'a> = BoxFuture<'a, Result<(), SystemError>>;

/// Outcome of calling [`GameSystem::update`].
pub enum SystemUpdate<'a> {
    /// The update already ran to completion.
    Ready(Result<(), SystemError>),
    /// The update continues asynchronously.
    Pending(SystemFuture<'a>),
}

impl SystemUpdate<'_> {
    /// A successful synchronous update.
    pub const fn done() -> Self {
        Self::Ready(Ok(()))
    }
}

impl From<Result<(), SystemError>> for SystemUpdate<'_> {
    fn from(result: Result<(), SystemError>) -> Self {
        Self::Ready(result)
    }
}

/// A gameplay system driven by the scheduler.
pub trait GameSystem: Send {
    /// Advance the system by `delta_ms` milliseconds of simulation time.
    fn update(&mut self, delta_ms: f64) -> SystemUpdate<'_>;
}

impl<F> GameSystem for F
where
    F: FnMut(f64) -> Result<(), SystemError> + Send,
{
    fn update(&mut self, delta_ms: f64) -> SystemUpdate<'_> {
        SystemUpdate::Ready(self(delta_ms))
    }
}

/// A system together with its scheduling metadata.
pub struct ScheduledSystem {
    /// Name used in logs and metrics. Not required to be unique.
    pub name: String,
    /// Bucket the system runs in, fixed for its lifetime.
    pub rate: TickRate,
    /// Initial enabled state.
    pub enabled: bool,
    /// Skip the system while the host entity count is below this value.
    pub min_entities: Option<usize>,
    /// The system itself.
    pub system: Box<dyn GameSystem>,
}

impl ScheduledSystem {
    /// Wrap `system` as an enabled system without an entity threshold.
    pub fn new(name: impl Into<String>, rate: TickRate, system: impl GameSystem + 'static) -> Self {
        Self {
            name: name.into(),
            rate,
            enabled: true,
            min_entities: None,
            system: Box::new(system),
        }
    }

    /// Wrap a synchronous closure as a system.
    pub fn from_fn<F>(name: impl Into<String>, rate: TickRate, update: F) -> Self
    where
        F: FnMut(f64) -> Result<(), SystemError> + Send + 'static,
    {
        Self::new(name, rate, update)
    }

    /// Only run while at least `count` entities exist.
    #[must_use]
    pub const fn with_min_entities(mut self, count: usize) -> Self {
        self.min_entities = Some(count);
        self
    }

    /// Register the system disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl core::fmt::Debug for ScheduledSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduledSystem")
            .field("name", &self.name)
            .field("rate", &self.rate)
            .field("enabled", &self.enabled)
            .field("min_entities", &self.min_entities)
            .finish_non_exhaustive()
    }
}
