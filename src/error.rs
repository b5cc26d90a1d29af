//! Error taxonomy shared by the store, gateway and sync engine
//!
//! Every variant is serializable so a failure raised by the server-side
//! gateway reaches the remote client with its kind intact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain errors surfaced to callers as structured values
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PokerError {
    /// Referenced session or vote row does not exist
    #[error("{what} not found: {id}")]
    NotFound { what: String, id: String },

    /// A non-host attempted a host-only mutation
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The underlying store rejected or failed an operation
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// Subscribing to or unsubscribing from the change feed failed
    #[error("notifier failure: {0}")]
    NotifierFailure(String),

    /// Request payload rejected at the boundary
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The connection was already torn down
    #[error("connection closed")]
    Closed,
}

impl PokerError {
    pub fn not_found(what: &str, id: impl ToString) -> Self {
        PokerError::NotFound {
            what: what.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PokerError::NotFound { .. })
    }
}

/// Result alias for domain operations
pub type Result<T> = std::result::Result<T, PokerError>;
