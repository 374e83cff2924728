//! Messages exchanged with the serialization worker.
//!
//! Every envelope serializes as a JSON object tagged by `"type"`:
//!
//! | direction | `type`           | fields                  |
//! |-----------|------------------|-------------------------|
//! | to worker | `snapshot`       | `data`                  |
//! | to worker | `shutdown`       |                         |
//! | from      | `ready`          |                         |
//! | from      | `snapshot-ready` | `data` (string), `size` |
//! | from      | `error`          | `error`                 |

use cadence_types::SnapshotDelta;
use serde::{Deserialize, Serialize};

/// Request sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Serialize this delta.
    Snapshot {
        /// The delta to serialize.
        data: Box<SnapshotDelta>,
    },
    /// Finish and exit.
    Shutdown,
}

/// Reply sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerReply {
    /// The worker is accepting requests.
    Ready,
    /// A delta was serialized.
    SnapshotReady {
        /// The serialized JSON document.
        data: String,
        /// Length of `data` in bytes.
        size: usize,
    },
    /// Serialization failed.
    Error {
        /// Description of the failure.
        error: String,
    },
}

/// Events the manager re-emits to the rest of the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SimulationEvent {
    /// A serialized delta, parsed back into a JSON value.
    Snapshot {
        /// Serialized size in bytes.
        size: usize,
        /// The delta document.
        data: serde_json::Value,
    },
    /// The worker crashed more often than allowed and will not be respawned.
    WorkerDegraded {
        /// Respawns attempted before giving up.
        restarts: u32,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reply_tags_are_kebab_case() {
        assert_eq!(serde_json::to_value(WorkerReply::Ready).unwrap(), json!({"type": "ready"}));
        assert_eq!(
            serde_json::to_value(WorkerReply::SnapshotReady {
                data: "{}".to_owned(),
                size: 2
            })
            .unwrap(),
            json!({"type": "snapshot-ready", "data": "{}", "size": 2})
        );
        assert_eq!(
            serde_json::to_value(WorkerReply::Error {
                error: "bad".to_owned()
            })
            .unwrap(),
            json!({"type": "error", "error": "bad"})
        );
    }

    #[test]
    fn replies_parse_from_wire_form() {
        let reply: WorkerReply =
            serde_json::from_str(r#"{"type":"snapshot-ready","data":"[]","size":2}"#).unwrap();
        assert_eq!(
            reply,
            WorkerReply::SnapshotReady {
                data: "[]".to_owned(),
                size: 2
            }
        );
    }

    #[test]
    fn shutdown_tag() {
        assert_eq!(
            serde_json::to_value(WorkerRequest::Shutdown).unwrap(),
            json!({"type": "shutdown"})
        );
    }

    #[test]
    fn degraded_event_tag() {
        let event = SimulationEvent::WorkerDegraded { restarts: 3 };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["type"], "worker-degraded");
    }
}
