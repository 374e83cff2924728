//! Timer-driven scheduler behaviour under tokio's paused clock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cadence_core::config::SchedulerConfig;
use cadence_core::{
    GameSystem, MultiRateScheduler, PerformanceMonitor, ScheduledSystem, SchedulerHooks,
    SystemFuture, SystemUpdate,
};
use cadence_types::TickRate;
use tokio::time::Instant;

fn counting(name: &str, rate: TickRate, counter: &Arc<AtomicUsize>) -> ScheduledSystem {
    let counter = Arc::clone(counter);
    ScheduledSystem::from_fn(name, rate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Async system that sleeps for `period` before counting a run.
struct Sleeper {
    period: Duration,
    runs: Arc<AtomicUsize>,
}

impl GameSystem for Sleeper {
    fn update(&mut self, _delta_ms: f64) -> SystemUpdate<'_> {
        let period = self.period;
        let runs = Arc::clone(&self.runs);
        let future: SystemFuture<'_> = Box::pin(async move {
            tokio::time::sleep(period).await;
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        SystemUpdate::Pending(future)
    }
}

fn sleeper(name: &str, rate: TickRate, millis: u64, runs: &Arc<AtomicUsize>) -> ScheduledSystem {
    ScheduledSystem::new(
        name,
        rate,
        Sleeper {
            period: Duration::from_millis(millis),
            runs: Arc::clone(runs),
        },
    )
}

fn scheduler() -> MultiRateScheduler {
    MultiRateScheduler::new(
        &SchedulerConfig::default(),
        Arc::new(PerformanceMonitor::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn fast_system_runs_about_ten_times_in_525ms() {
    let scheduler = scheduler();
    let fast = Arc::new(AtomicUsize::new(0));
    let medium = Arc::new(AtomicUsize::new(0));
    let slow = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(counting("Needs", TickRate::Fast, &fast));
    scheduler.register_system(counting("Economy", TickRate::Medium, &medium));
    scheduler.register_system(counting("Weather", TickRate::Slow, &slow));

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(525)).await;

    let fast_runs = fast.load(Ordering::SeqCst);
    assert!((9..=11).contains(&fast_runs), "fast ran {fast_runs} times");
    assert!((1..=3).contains(&medium.load(Ordering::SeqCst)));
    assert_eq!(slow.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.current_tick(), u64::try_from(fast_runs).unwrap());

    scheduler.stop();
    let after_stop = fast.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fast.load(Ordering::SeqCst), after_stop);
}

#[tokio::test(start_paused = true)]
async fn no_pass_before_first_period() {
    let scheduler = scheduler();
    let fast = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(counting("Needs", TickRate::Fast, &fast));
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(fast.load(Ordering::SeqCst), 0);
    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn double_start_does_not_double_the_rate() {
    let scheduler = scheduler();
    let fast = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(counting("Needs", TickRate::Fast, &fast));
    scheduler.start().unwrap();
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(525)).await;
    assert!(fast.load(Ordering::SeqCst) <= 11);
    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_registered_systems() {
    let scheduler = scheduler();
    let fast = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(counting("Needs", TickRate::Fast, &fast));

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    scheduler.stop();
    let first_run = fast.load(Ordering::SeqCst);
    assert!(first_run >= 1);

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    scheduler.stop();
    assert!(fast.load(Ordering::SeqCst) > first_run);
}

#[tokio::test(start_paused = true)]
async fn hooks_fire_for_every_timed_pass() {
    let scheduler = scheduler();
    let posts = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&posts);
    scheduler.set_hooks(SchedulerHooks {
        post_tick: Some(Arc::new(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        })),
        ..SchedulerHooks::default()
    });

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1010)).await;
    scheduler.stop();

    // 20 FAST + 4 MEDIUM + 1 SLOW passes, give or take a boundary tick.
    let total = posts.load(Ordering::SeqCst);
    assert!((23..=27).contains(&total), "post_tick fired {total} times");
}

#[tokio::test(start_paused = true)]
async fn slow_medium_system_does_not_delay_fast_passes() {
    let scheduler = scheduler();
    let fast = Arc::new(AtomicUsize::new(0));
    let medium = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(counting("Needs", TickRate::Fast, &fast));
    scheduler.register_system(sleeper("Pathing", TickRate::Medium, 400, &medium));

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(525)).await;
    scheduler.stop();

    let fast_runs = fast.load(Ordering::SeqCst);
    assert!((9..=11).contains(&fast_runs), "fast ran {fast_runs} times");
    assert_eq!(medium.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_update_completes_after_stop() {
    let scheduler = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(sleeper("Pathing", TickRate::Medium, 200, &runs));

    scheduler.start().unwrap();
    // The first MEDIUM pass starts at 250 ms and is still sleeping.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.stop();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_pass_waits_for_timed_pass_of_same_rate() {
    let scheduler = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler.register_system(sleeper("Pathing", TickRate::Medium, 200, &runs));

    scheduler.start().unwrap();
    // The timed pass holds the MEDIUM bucket from 250 ms to 450 ms.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let requested = Instant::now();
    scheduler.run_pass(TickRate::Medium).await;
    let waited = requested.elapsed();
    scheduler.stop();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(waited >= Duration::from_millis(350), "returned after {waited:?}");
}
