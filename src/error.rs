//! Crate-level error types
//!
//! One error per taxonomy class the coordinator distinguishes: validation,
//! role violation (surfaced through [`RegistryError`]), adapter failure,
//! and benign races against concurrent teardown. The public message entry
//! point never propagates these to the embedding server; they become
//! caller-directed error notices or logged drops.

use crate::registry::RegistryError;
use crate::transport::TransportError;

/// Error type for coordinator operations
#[derive(Debug)]
pub enum Error {
    /// A message was missing a required field or exceeded a size limit
    Validation(String),
    /// The caller's role does not permit the operation
    Role(RegistryError),
    /// The transport adapter failed or timed out
    Transport(TransportError),
    /// The message or negotiation referenced state that no longer exists;
    /// benign, dropped with a log entry and never surfaced to any party
    Stale(&'static str),
}

impl Error {
    /// Whether this error is a benign race to drop silently
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::Stale(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Invalid message: {}", msg),
            Error::Role(err) => write!(f, "{}", err),
            Error::Transport(err) => write!(f, "Transport failure: {}", err),
            Error::Stale(reason) => write!(f, "Stale state: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Role(err) => Some(err),
            Error::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Role(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
