//! Participant identity and role types
//!
//! This module defines the keys used throughout the coordinator: connection
//! identities, source identifiers, and the role binding that ties a
//! connection to the participant it represents.

use serde::{Deserialize, Serialize};

/// Opaque identity of one signaling connection
///
/// Allocated by the coordinator when the connection is registered and never
/// reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

impl ConnId {
    /// Raw numeric value, for logging and diagnostics
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a broadcast source (e.g. a field agent id)
///
/// Listeners subscribe by source identifier, possibly before the source has
/// ever connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Create a new source identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (rejected at the wire boundary)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Human-readable descriptor attached to a participant at registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Display name shown to operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Free-form metadata supplied by the upstream application
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl ParticipantInfo {
    /// Descriptor with just a display name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Association of a connection to exactly one participant role
///
/// A connection holds at most one binding at a time; re-binding overwrites
/// the previous role after its side effects have been released.
#[derive(Debug, Clone)]
pub enum RoleBinding {
    /// The connection is a broadcast source
    Source {
        /// Identifier the source announced itself under
        source_id: SourceId,
        /// Descriptor supplied at announce time
        info: ParticipantInfo,
    },
    /// The connection is a listener subscribed to one source
    Listener {
        /// Identifier of the source being listened to
        source_id: SourceId,
        /// Descriptor supplied at subscribe time
        info: ParticipantInfo,
    },
}

impl RoleBinding {
    /// The source identifier this binding refers to
    pub fn source_id(&self) -> &SourceId {
        match self {
            RoleBinding::Source { source_id, .. } => source_id,
            RoleBinding::Listener { source_id, .. } => source_id,
        }
    }

    /// Whether the binding is a source role
    pub fn is_source(&self) -> bool {
        matches!(self, RoleBinding::Source { .. })
    }

    /// Whether the binding is a listener role
    pub fn is_listener(&self) -> bool {
        matches!(self, RoleBinding::Listener { .. })
    }
}
