//! Error types for the `cadence-snapshot` crate.

/// Errors raised while setting up the snapshot manager.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The manager must be created inside a tokio runtime.
    #[error("snapshot manager must be created from within a tokio runtime")]
    NoRuntime,

    /// The worker thread could not be spawned.
    #[error("failed to spawn snapshot worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised inside the serialization worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The payload could not be serialized to JSON.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}
