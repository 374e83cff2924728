//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every record held in a world-state section has a strongly-typed ID so
//! keys from different sections cannot be mixed at compile time. IDs use
//! UUID v7 (time-ordered), which keeps `BTreeMap` iteration roughly in
//! creation order.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an agent.
    AgentId
}

define_id! {
    /// Unique identifier for a generic world entity (items, props, buildings).
    EntityId
}

define_id! {
    /// Unique identifier for an animal.
    AnimalId
}

define_id! {
    /// Unique identifier for a zone (a named region of the map).
    ZoneId
}

define_id! {
    /// Unique identifier for a harvestable world resource node.
    ResourceNodeId
}

define_id! {
    /// Unique identifier for a simulation event.
    EventId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(AgentId::new(), AgentId::new());
    }

    #[test]
    fn id_serializes_as_plain_uuid_string() {
        let id = ZoneId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", id.into_inner()));
    }
}
