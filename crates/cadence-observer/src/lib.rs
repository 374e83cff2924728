//! Read-only HTTP surface for a running Cadence simulation.
//!
//! Exposes metrics in text exposition format, scheduler and timing
//! statistics as JSON, the registered systems, the cache bus versions and
//! the latest snapshot document.
//!
//! # Modules
//!
//! - [`router`] -- Route table with CORS and request tracing
//! - [`handlers`] -- One handler per endpoint
//! - [`state`] -- [`AppState`] shared by the handlers
//! - [`server`] -- Binding and background serving
//! - [`error`] -- JSON error responses

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, spawn_observer};
pub use state::{AppState, LatestSnapshot};
