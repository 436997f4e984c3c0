//! Error types for weave and aggregator operations

use loom_core::CoreError;
use thiserror::Error;

/// Result type for weave operations
pub type Result<T> = std::result::Result<T, WeaveError>;

/// Errors raised while building layers or committing balances
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Signing, hashing or encoding failed in the core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A layer needs at least one input
    #[error("Cannot generate a layer without inputs")]
    NoInputs,

    /// Summing balance reports overflowed
    #[error("Balance overflow in {field}")]
    BalanceOverflow { field: &'static str },

    /// Value could not be serialized for hashing
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WeaveError {
    fn from(e: serde_json::Error) -> Self {
        WeaveError::Serialization(e.to_string())
    }
}
