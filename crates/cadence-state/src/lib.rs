//! World-state caching for the Cadence simulation core.
//!
//! Snapshots are built copy-on-write: a dirty tracker records which
//! sections changed, the cache clones only those and shares the rest with
//! the previous snapshot, and the delta encoder ships only the changed
//! entries.
//!
//! # Modules
//!
//! - [`dirty`] -- [`StateDirtyTracker`], the set of mutated sections
//! - [`tracked`] -- [`TrackedWorld`], the mutation wrapper that feeds it
//! - [`cache`] -- [`StateCache`], the copy-on-write snapshot builder
//! - [`delta`] -- [`DeltaEncoder`], snapshot-to-snapshot diffs with keyframes

pub mod cache;
pub mod delta;
pub mod dirty;
pub mod tracked;

pub use cache::StateCache;
pub use delta::DeltaEncoder;
pub use dirty::StateDirtyTracker;
pub use tracked::TrackedWorld;
