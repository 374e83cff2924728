//! The serialization worker.
//!
//! [`run`] is the entry point executed on the dedicated worker thread. It
//! announces itself with [`WorkerReply::Ready`], then serializes each
//! snapshot request and replies with the resulting JSON string. It never
//! touches live state: requests carry owned deltas.

use std::sync::mpsc::Receiver;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::WorkerError;
use crate::protocol::{WorkerReply, WorkerRequest};

/// Why the worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// A [`WorkerRequest::Shutdown`] was received.
    Shutdown,
    /// The request channel was closed by the manager.
    Disconnected,
    /// Nobody is listening for replies anymore.
    Orphaned,
}

/// Signature of a worker entry point. [`run`] in production.
///
/// The entry owns the request receiver; the reply sender stays alive until
/// the entry returns.
pub type WorkerEntry = fn(Receiver<WorkerRequest>, &UnboundedSender<WorkerReply>) -> WorkerExit;

/// Serialize `payload` to a compact JSON string.
///
/// # Errors
///
/// Returns [`WorkerError::Serialize`] if the payload cannot be
/// represented as JSON.
pub fn serialize_payload<T>(payload: &T) -> Result<String, WorkerError>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_string(payload)?)
}

/// Turn one request into its reply. `None` for [`WorkerRequest::Shutdown`].
pub fn handle_request(request: &WorkerRequest) -> Option<WorkerReply> {
    match request {
        WorkerRequest::Snapshot { data } => Some(match serialize_payload(data) {
            Ok(json) => WorkerReply::SnapshotReady {
                size: json.len(),
                data: json,
            },
            Err(e) => WorkerReply::Error {
                error: e.to_string(),
            },
        }),
        WorkerRequest::Shutdown => None,
    }
}

/// Worker thread main loop.
pub fn run(
    requests: Receiver<WorkerRequest>,
    replies: &UnboundedSender<WorkerReply>,
) -> WorkerExit {
    if replies.send(WorkerReply::Ready).is_err() {
        return WorkerExit::Orphaned;
    }
    for request in requests {
        let Some(reply) = handle_request(&request) else {
            debug!("Snapshot worker shutting down");
            return WorkerExit::Shutdown;
        };
        if replies.send(reply).is_err() {
            return WorkerExit::Orphaned;
        }
    }
    WorkerExit::Disconnected
}
