//! Multi-rate cooperative scheduler.
//!
//! The scheduler drives three independently timed periodic passes (FAST,
//! MEDIUM, SLOW) over disjoint buckets of registered [`GameSystem`]s.
//! Every pass, whatever its rate, is wrapped by the host's `pre_tick` and
//! `post_tick` hooks.
//!
//! # Pass execution
//!
//! For each system of the bucket, in registration order:
//!
//! 1. skip it if disabled;
//! 2. skip it if it has a `min_entities` threshold above the current
//!    entity count (equality runs);
//! 3. if the pass has already used up its time budget, yield to the
//!    runtime once, then continue the same pass;
//! 4. call `update(delta_ms)` and await the result if it is asynchronous,
//!    warning when an asynchronous update exceeds its soft budget;
//! 5. record the duration under `(rate, name)`;
//! 6. log errors and panics with the system name and move on.
//!
//! Hook panics are caught and logged the same way, so neither a system nor
//! a hook can take a pass down.
//!
//! # Timers
//!
//! [`MultiRateScheduler::start`] spawns one tokio task per rate. Each task
//! owns an interval whose first firing is one period after `start`, and
//! skips missed ticks instead of bursting. [`MultiRateScheduler::stop`]
//! signals the tasks; a pass already in flight runs to completion.
//!
//! Passes of the same rate never overlap. A pass that starts while another
//! pass of its bucket is still awaiting waits for it to finish first, so
//! every pass sees every system of the bucket. Passes of different rates
//! are independent.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cadence_types::TickRate;
use futures::FutureExt as _;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{SchedulerConfig, TickRatesConfig};
use crate::perf::PerformanceMonitor;
use crate::sync::{lock, read, write};
use crate::system::{GameSystem, ScheduledSystem, SystemError, SystemUpdate};

/// Errors returned by scheduler control operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called outside a tokio runtime.
    #[error("scheduler must be started from within a tokio runtime")]
    NoRuntime,
}

/// Hook run around every pass. Receives the rate of the pass.
pub type TickHook = Arc<dyn Fn(TickRate) + Send + Sync>;

/// Host-supplied entity counter.
pub type EntityCounter = Arc<dyn Fn() -> usize + Send + Sync>;

/// Host callbacks the scheduler invokes. Replaced wholesale by
/// [`MultiRateScheduler::set_hooks`].
#[derive(Clone, Default)]
pub struct SchedulerHooks {
    /// Runs before any system of a pass.
    pub pre_tick: Option<TickHook>,
    /// Runs after every system of a pass settled.
    pub post_tick: Option<TickHook>,
    /// Counts entities for `min_entities` gating. Without it the count is 0.
    pub entity_count: Option<EntityCounter>,
}

impl core::fmt::Debug for SchedulerHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerHooks")
            .field("pre_tick", &self.pre_tick.is_some())
            .field("post_tick", &self.post_tick.is_some())
            .field("entity_count", &self.entity_count.is_some())
            .finish()
    }
}

/// Period of each rate bucket. Immutable once the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRates {
    /// FAST period.
    pub fast: Duration,
    /// MEDIUM period.
    pub medium: Duration,
    /// SLOW period.
    pub slow: Duration,
}

impl TickRates {
    /// Period of `rate`.
    pub const fn period(&self, rate: TickRate) -> Duration {
        match rate {
            TickRate::Fast => self.fast,
            TickRate::Medium => self.medium,
            TickRate::Slow => self.slow,
        }
    }
}

impl From<&TickRatesConfig> for TickRates {
    fn from(config: &TickRatesConfig) -> Self {
        Self {
            fast: Duration::from_millis(config.fast_ms),
            medium: Duration::from_millis(config.medium_ms),
            slow: Duration::from_millis(config.slow_ms),
        }
    }
}

/// Time budgets applied during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerBudgets {
    /// Elapsed pass time after which the pass yields once.
    pub tick_budget: Duration,
    /// Soft budget for one asynchronous update (warning only).
    pub async_system_budget: Duration,
    /// Freshness of the memoized entity count.
    pub entity_count_ttl: Duration,
}

impl From<&SchedulerConfig> for SchedulerBudgets {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_budget: config.tick_budget(),
            async_system_budget: config.async_system_budget(),
            entity_count_ttl: config.entity_count_ttl(),
        }
    }
}

/// Introspection record for one registered system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemDescriptor {
    /// System name.
    pub name: String,
    /// Bucket the system runs in.
    pub rate: TickRate,
    /// Current enabled state.
    pub enabled: bool,
    /// Entity threshold, if any.
    pub min_entities: Option<usize>,
}

/// Per-bucket counts reported by [`MultiRateScheduler::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    /// Rate bucket.
    pub rate: TickRate,
    /// Configured period.
    pub period_ms: u64,
    /// Systems registered in the bucket.
    pub registered: usize,
    /// Of which enabled.
    pub enabled: usize,
}

/// Scheduler state reported by [`MultiRateScheduler::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Whether the timers are armed.
    pub running: bool,
    /// Number of FAST passes started so far.
    pub current_tick: u64,
    /// One entry per rate.
    pub buckets: Vec<BucketStats>,
}

/// Why a system update did not succeed.
#[derive(Debug, thiserror::Error)]
enum SystemFailure {
    #[error("{0}")]
    Error(#[from] SystemError),
    #[error("panicked: {0}")]
    Panicked(String),
}

struct SystemEntry {
    name: String,
    min_entities: Option<usize>,
    enabled: Arc<AtomicBool>,
    system: Box<dyn GameSystem>,
}

struct RegistryEntry {
    name: String,
    rate: TickRate,
    min_entities: Option<usize>,
    enabled: Arc<AtomicBool>,
}

#[derive(Default)]
struct Bucket {
    systems: Mutex<Vec<SystemEntry>>,
    last_pass: Mutex<Option<Instant>>,
    /// Held for the whole pass, across awaits.
    in_flight: tokio::sync::Mutex<()>,
}

impl Bucket {
    /// Milliseconds since the previous pass of this bucket, or the nominal
    /// period on the first pass.
    fn delta_ms(&self, now: Instant, period: Duration) -> f64 {
        let previous = lock(&self.last_pass).replace(now);
        let elapsed = previous.map_or(period, |at| now.saturating_duration_since(at));
        elapsed.as_secs_f64() * 1000.0
    }

    fn lease(&self) -> Lease<'_> {
        let systems = std::mem::take(&mut *lock(&self.systems));
        Lease {
            bucket: self,
            systems,
        }
    }
}

/// Systems taken out of a bucket for the duration of a pass.
///
/// Only taken while holding the bucket's `in_flight` lock. Dropping the
/// lease puts them back ahead of anything registered while the pass was
/// running, preserving registration order.
struct Lease<'a> {
    bucket: &'a Bucket,
    systems: Vec<SystemEntry>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut slot = lock(&self.bucket.systems);
        let added = std::mem::take(&mut *slot);
        let mut systems = std::mem::take(&mut self.systems);
        systems.extend(added);
        *slot = systems;
    }
}

struct SchedulerInner {
    rates: TickRates,
    budgets: SchedulerBudgets,
    fast: Bucket,
    medium: Bucket,
    slow: Bucket,
    registry: RwLock<Vec<RegistryEntry>>,
    hooks: RwLock<SchedulerHooks>,
    entity_cache: Mutex<Option<(Instant, usize)>>,
    tick: AtomicU64,
    perf: Arc<PerformanceMonitor>,
}

impl SchedulerInner {
    const fn bucket(&self, rate: TickRate) -> &Bucket {
        match rate {
            TickRate::Fast => &self.fast,
            TickRate::Medium => &self.medium,
            TickRate::Slow => &self.slow,
        }
    }

    async fn run_pass(&self, rate: TickRate) {
        let bucket = self.bucket(rate);
        let _in_flight = bucket.in_flight.lock().await;
        let started = Instant::now();
        let delta_ms = bucket.delta_ms(started, self.rates.period(rate));

        if rate == TickRate::Fast {
            let tick = self.tick.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            trace!(tick, "FAST tick");
        }

        let hooks = read(&self.hooks).clone();
        run_hook("pre_tick", rate, hooks.pre_tick.as_ref());

        let entity_count = self.entity_count();
        let mut lease = bucket.lease();
        let mut yielded = false;

        for entry in &mut lease.systems {
            if !entry.enabled.load(Ordering::Acquire) {
                continue;
            }
            if let Some(min) = entry.min_entities
                && entity_count < min
            {
                trace!(
                    system = %entry.name,
                    rate = %rate,
                    entity_count,
                    min_entities = min,
                    "Skipping system below entity threshold"
                );
                continue;
            }
            if !yielded && started.elapsed() > self.budgets.tick_budget {
                yielded = true;
                debug!(
                    rate = %rate,
                    elapsed_ms = started.elapsed().as_millis(),
                    budget_ms = self.budgets.tick_budget.as_millis(),
                    "Pass over budget, yielding once"
                );
                tokio::task::yield_now().await;
            }
            self.execute_system(rate, entry, delta_ms).await;
        }
        drop(lease);

        run_hook("post_tick", rate, hooks.post_tick.as_ref());
        self.perf.record_tick(rate, started.elapsed());
    }

    async fn execute_system(&self, rate: TickRate, entry: &mut SystemEntry, delta_ms: f64) {
        let started = Instant::now();
        let system = &mut entry.system;
        let invoked = catch_unwind(AssertUnwindSafe(move || {
            // Move the borrow into the body so a pending future may keep it.
            let system = system;
            system.update(delta_ms)
        }));

        let outcome = match invoked {
            Err(payload) => Err(SystemFailure::Panicked(panic_message(payload.as_ref()))),
            Ok(SystemUpdate::Ready(result)) => result.map_err(SystemFailure::from),
            Ok(SystemUpdate::Pending(future)) => {
                let result = AssertUnwindSafe(future).catch_unwind().await;
                let elapsed = started.elapsed();
                if elapsed > self.budgets.async_system_budget {
                    warn!(
                        system = %entry.name,
                        rate = %rate,
                        elapsed_ms = elapsed.as_millis(),
                        budget_ms = self.budgets.async_system_budget.as_millis(),
                        "Async system exceeded its soft budget"
                    );
                }
                match result {
                    Err(payload) => Err(SystemFailure::Panicked(panic_message(payload.as_ref()))),
                    Ok(result) => result.map_err(SystemFailure::from),
                }
            }
        };

        self.perf.record_system(rate, &entry.name, started.elapsed());

        if let Err(failure) = outcome {
            error!(
                system = %entry.name,
                rate = %rate,
                error = %failure,
                "System update failed"
            );
        }
    }

    fn entity_count(&self) -> usize {
        let Some(counter) = read(&self.hooks).entity_count.clone() else {
            return 0;
        };

        let now = Instant::now();
        let mut cache = lock(&self.entity_cache);
        if let Some((at, count)) = *cache
            && now.saturating_duration_since(at) < self.budgets.entity_count_ttl
        {
            return count;
        }

        let count = match catch_unwind(AssertUnwindSafe(|| counter())) {
            Ok(count) => count,
            Err(payload) => {
                error!(
                    error = %panic_message(payload.as_ref()),
                    "Entity count hook panicked, reusing last value"
                );
                cache.map_or(0, |(_, count)| count)
            }
        };
        *cache = Some((now, count));
        count
    }
}

struct RunningTimers {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Three-frequency cooperative scheduler. See the module documentation.
pub struct MultiRateScheduler {
    inner: Arc<SchedulerInner>,
    running: Mutex<Option<RunningTimers>>,
}

impl MultiRateScheduler {
    /// Build a scheduler from configuration.
    pub fn new(config: &SchedulerConfig, perf: Arc<PerformanceMonitor>) -> Self {
        Self::with_parts(
            TickRates::from(&config.tick_rates),
            SchedulerBudgets::from(config),
            perf,
        )
    }

    /// Build a scheduler from explicit rates and budgets.
    pub fn with_parts(
        rates: TickRates,
        budgets: SchedulerBudgets,
        perf: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                rates,
                budgets,
                fast: Bucket::default(),
                medium: Bucket::default(),
                slow: Bucket::default(),
                registry: RwLock::new(Vec::new()),
                hooks: RwLock::new(SchedulerHooks::default()),
                entity_cache: Mutex::new(None),
                tick: AtomicU64::new(0),
                perf,
            }),
            running: Mutex::new(None),
        }
    }

    /// Configured periods.
    pub fn tick_rates(&self) -> TickRates {
        self.inner.rates
    }

    /// Append a system to the bucket of its rate.
    ///
    /// Names are not required to be unique: registering two systems with
    /// the same name runs both, and name-based administration affects both.
    pub fn register_system(&self, system: ScheduledSystem) {
        let ScheduledSystem {
            name,
            rate,
            enabled,
            min_entities,
            system,
        } = system;

        let enabled = Arc::new(AtomicBool::new(enabled));
        {
            let mut registry = write(&self.inner.registry);
            if registry.iter().any(|entry| entry.name == name) {
                debug!(system = %name, "Registering a second system with the same name");
            }
            registry.push(RegistryEntry {
                name: name.clone(),
                rate,
                min_entities,
                enabled: Arc::clone(&enabled),
            });
        }
        lock(&self.inner.bucket(rate).systems).push(SystemEntry {
            name: name.clone(),
            min_entities,
            enabled,
            system,
        });
        debug!(system = %name, rate = %rate, "System registered");
    }

    /// Replace every hook at once. Also drops the memoized entity count.
    pub fn set_hooks(&self, hooks: SchedulerHooks) {
        *write(&self.inner.hooks) = hooks;
        *lock(&self.inner.entity_cache) = None;
    }

    /// Arm the three rate timers. Calling it while running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] when called outside a tokio
    /// runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            warn!("Scheduler already running, ignoring start");
            return Ok(());
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_err| SchedulerError::NoRuntime)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = TickRate::ALL
            .into_iter()
            .map(|rate| runtime.spawn(rate_loop(Arc::clone(&self.inner), rate, stop_rx.clone())))
            .collect();
        *running = Some(RunningTimers { stop_tx, handles });

        info!(
            fast_ms = self.inner.rates.fast.as_millis(),
            medium_ms = self.inner.rates.medium.as_millis(),
            slow_ms = self.inner.rates.slow.as_millis(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Halt future passes. Registered systems stay for a later `start`.
    /// Calling it while stopped is a no-op.
    pub fn stop(&self) {
        let Some(timers) = lock(&self.running).take() else {
            debug!("Scheduler not running, ignoring stop");
            return;
        };
        // The tasks exit at their next select; in-flight passes finish.
        let _ = timers.stop_tx.send(true);
        drop(timers.handles);
        info!(tick = self.current_tick(), "Scheduler stopped");
    }

    /// Whether the timers are armed.
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Execute one pass of `rate` immediately, outside the timers.
    ///
    /// Waits for a pass of the same rate that is already in flight.
    pub async fn run_pass(&self, rate: TickRate) {
        self.inner.run_pass(rate).await;
    }

    /// Entity count from the host hook, memoized for the configured TTL.
    pub fn entity_count(&self) -> usize {
        self.inner.entity_count()
    }

    /// Number of FAST passes started so far.
    pub fn current_tick(&self) -> u64 {
        self.inner.tick.load(Ordering::Acquire)
    }

    /// Bucket sizes and run state.
    pub fn stats(&self) -> SchedulerStats {
        let registry = read(&self.inner.registry);
        let buckets = TickRate::ALL
            .into_iter()
            .map(|rate| {
                let in_bucket = registry.iter().filter(|entry| entry.rate == rate);
                let registered = in_bucket.clone().count();
                let enabled = in_bucket
                    .filter(|entry| entry.enabled.load(Ordering::Acquire))
                    .count();
                BucketStats {
                    rate,
                    period_ms: u64::try_from(self.inner.rates.period(rate).as_millis())
                        .unwrap_or(u64::MAX),
                    registered,
                    enabled,
                }
            })
            .collect();
        SchedulerStats {
            running: self.is_running(),
            current_tick: self.current_tick(),
            buckets,
        }
    }

    /// Enable or disable every system called `name`. Returns how many
    /// systems matched.
    pub fn set_system_enabled(&self, name: &str, enabled: bool) -> usize {
        let registry = read(&self.inner.registry);
        let mut matched: usize = 0;
        for entry in registry.iter().filter(|entry| entry.name == name) {
            entry.enabled.store(enabled, Ordering::Release);
            matched = matched.saturating_add(1);
        }
        if matched == 0 {
            warn!(system = name, "No system with that name");
        } else {
            info!(system = name, enabled, matched, "System toggled");
        }
        matched
    }

    /// Every registered system in registration order.
    pub fn systems_list(&self) -> Vec<SystemDescriptor> {
        read(&self.inner.registry)
            .iter()
            .map(|entry| SystemDescriptor {
                name: entry.name.clone(),
                rate: entry.rate,
                enabled: entry.enabled.load(Ordering::Acquire),
                min_entities: entry.min_entities,
            })
            .collect()
    }
}

impl core::fmt::Debug for MultiRateScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MultiRateScheduler")
            .field("rates", &self.inner.rates)
            .field("running", &self.is_running())
            .field("tick", &self.current_tick())
            .finish_non_exhaustive()
    }
}

async fn rate_loop(inner: Arc<SchedulerInner>, rate: TickRate, mut stop: watch::Receiver<bool>) {
    let period = inner.rates.period(rate).max(Duration::from_millis(1));
    let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if *stop.borrow() {
                    break;
                }
                inner.run_pass(rate).await;
            }
        }
    }
    debug!(rate = %rate, "Rate loop exited");
}

fn run_hook(label: &'static str, rate: TickRate, hook: Option<&TickHook>) {
    let Some(hook) = hook else {
        return;
    };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(rate))) {
        error!(
            hook = label,
            rate = %rate,
            error = %panic_message(payload.as_ref()),
            "Scheduler hook panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::system::SystemFuture;

    fn budgets(entity_count_ttl: Duration) -> SchedulerBudgets {
        SchedulerBudgets {
            tick_budget: Duration::from_millis(40),
            async_system_budget: Duration::from_millis(25),
            entity_count_ttl,
        }
    }

    fn rates() -> TickRates {
        TickRates {
            fast: Duration::from_millis(50),
            medium: Duration::from_millis(250),
            slow: Duration::from_millis(1000),
        }
    }

    fn scheduler() -> (MultiRateScheduler, Arc<PerformanceMonitor>) {
        let perf = Arc::new(PerformanceMonitor::new());
        let scheduler =
            MultiRateScheduler::with_parts(rates(), budgets(Duration::ZERO), Arc::clone(&perf));
        (scheduler, perf)
    }

    fn counting(name: &str, rate: TickRate, counter: &Arc<AtomicUsize>) -> ScheduledSystem {
        let counter = Arc::clone(counter);
        ScheduledSystem::from_fn(name, rate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn recording(
        name: &'static str,
        rate: TickRate,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> ScheduledSystem {
        let log = Arc::clone(log);
        ScheduledSystem::from_fn(name, rate, move |_| {
            log.lock().unwrap().push(name.to_owned());
            Ok(())
        })
    }

    struct SlowAsync {
        runs: Arc<AtomicUsize>,
    }

    impl GameSystem for SlowAsync {
        fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
            let runs = Arc::clone(&self.runs);
            let future: SystemFuture<'_> = Box::pin(async move {
                tokio::task::yield_now().await;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            SystemUpdate::Pending(future)
        }
    }

    #[test]
    fn registering_n_systems_lists_n_for_that_rate() {
        let (scheduler, _) = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            scheduler.register_system(counting(&format!("medium-{i}"), TickRate::Medium, &counter));
        }
        scheduler.register_system(counting("fast", TickRate::Fast, &counter));

        let list = scheduler.systems_list();
        assert_eq!(list.iter().filter(|s| s.rate == TickRate::Medium).count(), 4);
        assert_eq!(list.iter().filter(|s| s.rate == TickRate::Fast).count(), 1);
        assert_eq!(list.iter().filter(|s| s.rate == TickRate::Slow).count(), 0);

        let stats = scheduler.stats();
        assert!(!stats.running);
        assert_eq!(stats.buckets.len(), 3);
        assert_eq!(stats.buckets.iter().map(|b| b.registered).sum::<usize>(), 5);
    }

    #[tokio::test]
    async fn min_entities_boundary_is_inclusive() {
        let (scheduler, _) = scheduler();
        let entities = Arc::new(AtomicUsize::new(4));
        let count_source = Arc::clone(&entities);
        scheduler.set_hooks(SchedulerHooks {
            entity_count: Some(Arc::new(move || count_source.load(Ordering::SeqCst))),
            ..SchedulerHooks::default()
        });
        let runs = Arc::new(AtomicUsize::new(0));
        let social = counting("Social", TickRate::Medium, &runs).with_min_entities(5);
        scheduler.register_system(social);

        scheduler.run_pass(TickRate::Medium).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        entities.store(5, Ordering::SeqCst);
        scheduler.run_pass(TickRate::Medium).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        entities.store(6, Ordering::SeqCst);
        scheduler.run_pass(TickRate::Medium).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_counter_means_zero_entities() {
        let (scheduler, _) = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        let gated = counting("Gated", TickRate::Fast, &runs).with_min_entities(1);
        let ungated = counting("Ungated", TickRate::Fast, &runs).with_min_entities(0);
        scheduler.register_system(gated);
        scheduler.register_system(ungated);
        scheduler.run_pass(TickRate::Fast).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.entity_count(), 0);
    }

    #[tokio::test]
    async fn disabled_system_records_nothing_until_enabled() {
        let (scheduler, perf) = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register_system(counting("Weather", TickRate::Slow, &runs).disabled());

        scheduler.run_pass(TickRate::Slow).await;
        scheduler.run_pass(TickRate::Slow).await;
        assert!(perf.system_stats(TickRate::Slow, "Weather").is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.set_system_enabled("Weather", true), 1);
        scheduler.run_pass(TickRate::Slow).await;
        assert_eq!(perf.system_stats(TickRate::Slow, "Weather").map(|s| s.count), Some(1));

        scheduler.set_system_enabled("Weather", false);
        scheduler.run_pass(TickRate::Slow).await;
        assert_eq!(perf.system_stats(TickRate::Slow, "Weather").map(|s| s.count), Some(1));
        assert_eq!(scheduler.stats().buckets.iter().map(|b| b.enabled).sum::<usize>(), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_systems_do_not_stop_the_pass() {
        let (scheduler, perf) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_system(recording("first", TickRate::Fast, &log));
        scheduler.register_system(ScheduledSystem::from_fn("erroring", TickRate::Fast, |_| {
            Err(SystemError::Failed("boom".to_owned()))
        }));
        scheduler.register_system(ScheduledSystem::from_fn("panicking", TickRate::Fast, |_| {
            panic!("system exploded")
        }));
        scheduler.register_system(recording("last", TickRate::Fast, &log));

        scheduler.run_pass(TickRate::Fast).await;
        scheduler.run_pass(TickRate::Fast).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "last", "first", "last"]);
        assert_eq!(perf.system_stats(TickRate::Fast, "panicking").map(|s| s.count), Some(2));
        assert_eq!(scheduler.systems_list().len(), 4);
    }

    #[tokio::test]
    async fn hooks_wrap_every_pass_and_panics_are_contained() {
        let (scheduler, _) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pre_log = Arc::clone(&log);
        let post_log = Arc::clone(&log);
        scheduler.set_hooks(SchedulerHooks {
            pre_tick: Some(Arc::new(move |rate| {
                pre_log.lock().unwrap().push(format!("pre:{rate}"));
                if rate == TickRate::Slow {
                    panic!("pre_tick failed");
                }
            })),
            post_tick: Some(Arc::new(move |rate| {
                post_log.lock().unwrap().push(format!("post:{rate}"));
            })),
            entity_count: None,
        });
        scheduler.register_system(recording("fast-system", TickRate::Fast, &log));
        scheduler.register_system(recording("slow-system", TickRate::Slow, &log));

        scheduler.run_pass(TickRate::Fast).await;
        scheduler.run_pass(TickRate::Medium).await;
        scheduler.run_pass(TickRate::Slow).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "pre:FAST",
                "fast-system",
                "post:FAST",
                "pre:MEDIUM",
                "post:MEDIUM",
                "pre:SLOW",
                "slow-system",
                "post:SLOW",
            ]
        );
    }

    #[tokio::test]
    async fn async_systems_are_awaited_and_recorded() {
        let (scheduler, perf) = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register_system(ScheduledSystem::new(
            "Pathfinding",
            TickRate::Medium,
            SlowAsync {
                runs: Arc::clone(&runs),
            },
        ));
        scheduler.run_pass(TickRate::Medium).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            perf.system_stats(TickRate::Medium, "Pathfinding")
                .map(|s| s.count),
            Some(1)
        );
        assert_eq!(perf.rate_stats(TickRate::Medium).count, 1);
    }

    #[tokio::test]
    async fn duplicate_names_both_run() {
        let (scheduler, _) = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register_system(counting("Needs", TickRate::Fast, &runs));
        scheduler.register_system(counting("Needs", TickRate::Fast, &runs));
        scheduler.run_pass(TickRate::Fast).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.set_system_enabled("Needs", false), 2);
        assert_eq!(scheduler.set_system_enabled("Unknown", false), 0);
    }

    #[tokio::test]
    async fn tick_counts_fast_passes_only() {
        let (scheduler, _) = scheduler();
        scheduler.run_pass(TickRate::Medium).await;
        scheduler.run_pass(TickRate::Slow).await;
        assert_eq!(scheduler.current_tick(), 0);
        scheduler.run_pass(TickRate::Fast).await;
        scheduler.run_pass(TickRate::Medium).await;
        scheduler.run_pass(TickRate::Fast).await;
        assert_eq!(scheduler.current_tick(), 2);
    }

    #[tokio::test]
    async fn post_tick_sees_tick_of_current_pass() {
        let (scheduler, _) = scheduler();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_hook = Arc::clone(&seen);
        let scheduler = Arc::new(scheduler);
        let weak = Arc::downgrade(&scheduler);
        scheduler.set_hooks(SchedulerHooks {
            post_tick: Some(Arc::new(move |rate| {
                if rate == TickRate::Fast {
                    if let Some(s) = weak.upgrade() {
                        seen_in_hook.store(s.current_tick(), Ordering::SeqCst);
                    }
                }
            })),
            ..SchedulerHooks::default()
        });
        scheduler.run_pass(TickRate::Fast).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entity_count_is_memoized_within_ttl() {
        let perf = Arc::new(PerformanceMonitor::new());
        let scheduler =
            MultiRateScheduler::with_parts(rates(), budgets(Duration::from_millis(100)), perf);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        scheduler.set_hooks(SchedulerHooks {
            entity_count: Some(Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                7
            })),
            ..SchedulerHooks::default()
        });

        assert_eq!(scheduler.entity_count(), 7);
        assert_eq!(scheduler.entity_count(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(scheduler.entity_count(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn over_budget_pass_yields_before_remaining_systems() {
        let perf = Arc::new(PerformanceMonitor::new());
        let scheduler = MultiRateScheduler::with_parts(
            rates(),
            SchedulerBudgets {
                tick_budget: Duration::from_millis(1),
                async_system_budget: Duration::from_millis(25),
                entity_count_ttl: Duration::ZERO,
            },
            perf,
        );
        scheduler.register_system(ScheduledSystem::from_fn("heavy", TickRate::Fast, |_| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        }));
        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));
        let flag_reader = Arc::clone(&flag);
        let observed_writer = Arc::clone(&observed);
        scheduler.register_system(ScheduledSystem::from_fn("light", TickRate::Fast, move |_| {
            observed_writer.store(flag_reader.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }));

        // Only runs if the pass hands control back to the runtime.
        let flag_writer = Arc::clone(&flag);
        let _background = tokio::spawn(async move {
            flag_writer.store(true, Ordering::SeqCst);
        });

        scheduler.run_pass(TickRate::Fast).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (scheduler, _) = scheduler();
        assert!(matches!(scheduler.start(), Err(SchedulerError::NoRuntime)));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (scheduler, _) = scheduler();
        scheduler.stop();
        assert!(scheduler.start().is_ok());
        assert!(scheduler.start().is_ok());
        assert!(scheduler.is_running());
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
