//! Observer server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use cadence_core::config::ObserverConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::router::build_router;
use crate::state::AppState;

/// Bind address of the observer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g. `127.0.0.1`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl From<&ObserverConfig> for ServerConfig {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

/// Errors that can occur when starting or running the observer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server hit a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Bind eagerly, then serve on a background task.
///
/// Binding before spawning means a port conflict is reported to the
/// caller instead of being logged from inside the task.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or in use.
pub async fn spawn_observer(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let router = build_router(state);
    info!(addr = %local, "Observer listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %ServerError::Serve(e.to_string()), "Observer stopped");
        }
    }))
}
