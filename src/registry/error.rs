//! Registry error types
//!
//! Error types for participant registry operations.

use super::participant::SourceId;

/// Error type for registry operations
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The connection is bound as a source and may not subscribe
    BoundAsSource(SourceId),
    /// The operation requires a source binding the connection does not hold
    NotASource,
    /// The operation requires a listener binding the connection does not hold
    NotAListener,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::BoundAsSource(id) => {
                write!(f, "Connection is bound as source {} and cannot subscribe", id)
            }
            RegistryError::NotASource => write!(f, "Connection is not bound as a source"),
            RegistryError::NotAListener => write!(f, "Connection is not bound as a listener"),
        }
    }
}

impl std::error::Error for RegistryError {}
