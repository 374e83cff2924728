//! Constant-memory rolling performance metrics.
//!
//! [`PerformanceMonitor`] aggregates durations per rate bucket, per
//! `(rate, system)` pair and per named auxiliary operation. Aggregates are
//! fixed-size (`count`, `total_ms`, `max_ms`, `last_ms`), plus a small
//! fixed window of recent pass durations per rate, so memory does not grow
//! with uptime. The monitor is purely observational: nothing in the
//! scheduler reads it back.
//!
//! [`PerformanceMonitor::to_metrics_text`] renders the text exposition
//! format. Series names and labels are a compatibility surface for
//! dashboards and must not be renamed.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use cadence_types::TickRate;
use serde::Serialize;

use crate::sync::lock;

/// Number of recent pass durations kept per rate.
const RECENT_WINDOW: usize = 64;

/// Rolling aggregate for one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollingStats {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of all samples.
    pub total_ms: f64,
    /// Largest sample.
    pub max_ms: f64,
    /// Most recent sample.
    pub last_ms: f64,
}

impl RollingStats {
    fn record(&mut self, ms: f64) {
        self.count = self.count.saturating_add(1);
        self.total_ms += ms;
        self.last_ms = ms;
        if ms > self.max_ms {
            self.max_ms = ms;
        }
    }

    /// Mean sample, or 0 when nothing was recorded.
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
struct RateStats {
    stats: RollingStats,
    recent: VecDeque<f64>,
}

impl RateStats {
    fn record(&mut self, ms: f64) {
        self.stats.record(ms);
        if self.recent.len() >= RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ms);
    }

    #[allow(clippy::cast_precision_loss)]
    fn recent_avg_ms(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().sum::<f64>() / self.recent.len() as f64
    }
}

#[derive(Debug, Default)]
struct PerfInner {
    rates: BTreeMap<TickRate, RateStats>,
    systems: BTreeMap<(TickRate, String), RollingStats>,
    operations: BTreeMap<String, RollingStats>,
}

/// Serializable view of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of all samples.
    pub total_ms: f64,
    /// Largest sample.
    pub max_ms: f64,
    /// Most recent sample.
    pub last_ms: f64,
    /// Mean sample.
    pub avg_ms: f64,
}

impl From<&RollingStats> for StatsReport {
    fn from(stats: &RollingStats) -> Self {
        Self {
            count: stats.count,
            total_ms: stats.total_ms,
            max_ms: stats.max_ms,
            last_ms: stats.last_ms,
            avg_ms: stats.avg_ms(),
        }
    }
}

/// Per-rate section of a [`PerfSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateReport {
    /// Rate bucket.
    pub rate: TickRate,
    /// Pass duration aggregate.
    #[serde(flatten)]
    pub stats: StatsReport,
    /// Mean over the most recent passes.
    pub recent_avg_ms: f64,
}

/// Per-system section of a [`PerfSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemReport {
    /// Rate bucket the system runs in.
    pub rate: TickRate,
    /// System name.
    pub system: String,
    /// Update duration aggregate.
    #[serde(flatten)]
    pub stats: StatsReport,
}

/// Per-operation section of a [`PerfSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    /// Operation name.
    pub operation: String,
    /// Duration aggregate.
    #[serde(flatten)]
    pub stats: StatsReport,
}

/// Structured point-in-time copy of every aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfSnapshot {
    /// One entry per rate, always all three.
    pub rates: Vec<RateReport>,
    /// One entry per recorded `(rate, system)`.
    pub systems: Vec<SystemReport>,
    /// One entry per recorded operation.
    pub operations: Vec<OperationReport>,
}

/// Rolling metrics collector. See the module documentation.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    inner: Mutex<PerfInner>,
}

impl PerformanceMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the duration of one pass of `rate`.
    pub fn record_tick(&self, rate: TickRate, duration: Duration) {
        lock(&self.inner)
            .rates
            .entry(rate)
            .or_default()
            .record(millis(duration));
    }

    /// Record one update of `system` in the `rate` bucket.
    pub fn record_system(&self, rate: TickRate, system: &str, duration: Duration) {
        let mut inner = lock(&self.inner);
        let ms = millis(duration);
        if let Some(stats) = inner.systems.get_mut(&(rate, system.to_owned())) {
            stats.record(ms);
        } else {
            let mut stats = RollingStats::default();
            stats.record(ms);
            inner.systems.insert((rate, system.to_owned()), stats);
        }
    }

    /// Record one run of an auxiliary operation (snapshot build, index
    /// rebuild, ...).
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        lock(&self.inner)
            .operations
            .entry(operation.to_owned())
            .or_default()
            .record(millis(duration));
    }

    /// Aggregate for `rate`.
    pub fn rate_stats(&self, rate: TickRate) -> RollingStats {
        lock(&self.inner)
            .rates
            .get(&rate)
            .map(|r| r.stats)
            .unwrap_or_default()
    }

    /// Aggregate for one system, `None` if it never ran.
    pub fn system_stats(&self, rate: TickRate, system: &str) -> Option<RollingStats> {
        lock(&self.inner)
            .systems
            .get(&(rate, system.to_owned()))
            .copied()
    }

    /// Aggregate for one operation, `None` if it never ran.
    pub fn operation_stats(&self, operation: &str) -> Option<RollingStats> {
        lock(&self.inner).operations.get(operation).copied()
    }

    /// Structured copy of every aggregate.
    pub fn snapshot(&self) -> PerfSnapshot {
        let inner = lock(&self.inner);
        let rates = TickRate::ALL
            .into_iter()
            .map(|rate| {
                let (stats, recent_avg_ms) = inner
                    .rates
                    .get(&rate)
                    .map_or_else(
                        || (RollingStats::default(), 0.0),
                        |r| (r.stats, r.recent_avg_ms()),
                    );
                RateReport {
                    rate,
                    stats: StatsReport::from(&stats),
                    recent_avg_ms,
                }
            })
            .collect();
        let systems = inner
            .systems
            .iter()
            .map(|((rate, system), stats)| SystemReport {
                rate: *rate,
                system: system.clone(),
                stats: StatsReport::from(stats),
            })
            .collect();
        let operations = inner
            .operations
            .iter()
            .map(|(operation, stats)| OperationReport {
                operation: operation.clone(),
                stats: StatsReport::from(stats),
            })
            .collect();
        PerfSnapshot {
            rates,
            systems,
            operations,
        }
    }

    /// Render every aggregate in the text exposition format.
    pub fn to_metrics_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let rate_label = |r: &RateReport| format!("rate=\"{}\"", r.rate);
        write_series(
            &mut out,
            "tick_duration_ms",
            "Average scheduler pass duration in milliseconds.",
            "gauge",
            snapshot
                .rates
                .iter()
                .map(|r| (rate_label(r), r.stats.avg_ms)),
        );
        write_series(
            &mut out,
            "tick_duration_max_ms",
            "Longest scheduler pass duration in milliseconds.",
            "gauge",
            snapshot
                .rates
                .iter()
                .map(|r| (rate_label(r), r.stats.max_ms)),
        );
        write_series(
            &mut out,
            "tick_duration_last_ms",
            "Most recent scheduler pass duration in milliseconds.",
            "gauge",
            snapshot
                .rates
                .iter()
                .map(|r| (rate_label(r), r.stats.last_ms)),
        );
        write_counter(
            &mut out,
            "tick_count_total",
            "Scheduler passes executed.",
            snapshot
                .rates
                .iter()
                .map(|r| (rate_label(r), r.stats.count)),
        );

        let system_label = |s: &SystemReport| {
            format!("rate=\"{}\",system=\"{}\"", s.rate, escape_label(&s.system))
        };
        write_series(
            &mut out,
            "system_duration_ms",
            "Average system update duration in milliseconds.",
            "gauge",
            snapshot
                .systems
                .iter()
                .map(|s| (system_label(s), s.stats.avg_ms)),
        );
        write_series(
            &mut out,
            "system_duration_max_ms",
            "Longest system update duration in milliseconds.",
            "gauge",
            snapshot
                .systems
                .iter()
                .map(|s| (system_label(s), s.stats.max_ms)),
        );
        write_counter(
            &mut out,
            "system_execution_total",
            "System updates executed.",
            snapshot
                .systems
                .iter()
                .map(|s| (system_label(s), s.stats.count)),
        );

        let operation_label =
            |o: &OperationReport| format!("operation=\"{}\"", escape_label(&o.operation));
        write_series(
            &mut out,
            "operation_duration_ms",
            "Average auxiliary operation duration in milliseconds.",
            "gauge",
            snapshot
                .operations
                .iter()
                .map(|o| (operation_label(o), o.stats.avg_ms)),
        );
        write_counter(
            &mut out,
            "operation_count_total",
            "Auxiliary operations executed.",
            snapshot
                .operations
                .iter()
                .map(|o| (operation_label(o), o.stats.count)),
        );

        out
    }

    /// Drop every aggregate. Intended for test isolation.
    pub fn reset(&self) {
        *lock(&self.inner) = PerfInner::default();
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn write_series(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    samples: impl Iterator<Item = (String, f64)>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    for (labels, value) in samples {
        let _ = writeln!(out, "{name}{{{labels}}} {value:.3}");
    }
}

fn write_counter(
    out: &mut String,
    name: &str,
    help: &str,
    samples: impl Iterator<Item = (String, u64)>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (labels, value) in samples {
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
