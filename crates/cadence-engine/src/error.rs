//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode during startup and shutdown.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: cadence_core::ConfigError,
    },

    /// The scheduler could not be started.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: cadence_core::SchedulerError,
    },

    /// The snapshot manager could not be created.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: cadence_snapshot::SnapshotError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Observer API server failed to start.
    #[error("observer error: {message}")]
    Observer {
        /// Description of the observer failure.
        message: String,
    },
}
