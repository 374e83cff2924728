//! Engine binary for the Cadence simulation core.
//!
//! Wires the multi-rate scheduler, the demo gameplay systems, the
//! snapshot pipeline and the observer HTTP surface together, then runs
//! until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cadence-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Seed the world, register systems, create the snapshot manager
//! 4. Start the observer API server (unless disabled)
//! 5. Arm the scheduler timers
//! 6. Wait for Ctrl-C, then stop the scheduler and the snapshot worker

mod error;
mod runner;
mod seed;
mod systems;
mod world;

use std::path::Path;
use std::sync::Arc;

use cadence_core::config::LoggingConfig;
use cadence_core::{AppContext, SimulationConfig};
use cadence_observer::{AppState, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::runner::Engine;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "cadence-config.yaml";

/// Application entry point for the engine.
///
/// The runtime is single-threaded: the three rate tasks interleave only
/// at await points.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        world_name = config.world.name,
        seed = config.world.seed,
        fast_ms = config.scheduler.tick_rates.fast_ms,
        medium_ms = config.scheduler.tick_rates.medium_ms,
        slow_ms = config.scheduler.tick_rates.slow_ms,
        snapshot_interval_ms = config.snapshot.min_interval_ms,
        "cadence-engine starting"
    );

    // 3. Build the simulation.
    let ctx = AppContext::new();
    let engine = Engine::build(&config, &ctx)?;

    // 4. Start the observer API server.
    let observer = if config.observer.enabled {
        let state = Arc::new(AppState::new(ctx.clone(), Arc::clone(engine.scheduler())));
        let _follower = state.follow(engine.subscribe());
        let handle = cadence_observer::spawn_observer(&ServerConfig::from(&config.observer), state)
            .await
            .map_err(|e| EngineError::Observer {
                message: format!("{e}"),
            })?;
        Some(handle)
    } else {
        info!("Observer disabled");
        None
    };

    // 5. Run.
    engine.start()?;

    // 6. Shut down on Ctrl-C.
    tokio::signal::ctrl_c().await.map_err(EngineError::from)?;
    info!("Shutdown requested");
    engine.shutdown();
    if let Some(handle) = observer {
        handle.abort();
    }

    info!(
        total_ticks = engine.world().tick(),
        "cadence-engine shutdown complete"
    );
    Ok(())
}

/// Load the configuration from [`CONFIG_PATH`] if present.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok(SimulationConfig::from_file(config_path)?)
    } else {
        // Environment overrides still apply to the defaults.
        Ok(SimulationConfig::parse("")?)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the config level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
