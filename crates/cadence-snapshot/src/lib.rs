//! Snapshot pipeline for the Cadence simulation core.
//!
//! Serialization runs on a dedicated worker thread so the simulation loop
//! never pays for JSON encoding. The loop only clones what changed and
//! diffs it.
//!
//! # Modules
//!
//! - [`protocol`] -- Worker request/reply envelopes and re-emitted events
//! - [`worker`] -- The worker entry point and its serialization step
//! - [`manager`] -- [`SnapshotManager`]: throttling, enrichment, supervision
//! - [`error`] -- Error types

pub mod error;
pub mod manager;
pub mod protocol;
pub mod worker;

pub use error::{SnapshotError, WorkerError};
pub use manager::{GenerationOutcome, SnapshotManager, TransientSource};
pub use protocol::{SimulationEvent, WorkerReply, WorkerRequest};
pub use worker::{WorkerEntry, WorkerExit};
