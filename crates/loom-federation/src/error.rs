//! Error types for federation operations

use loom_core::CoreError;
use thiserror::Error;

/// Result type for federation operations
pub type Result<T> = std::result::Result<T, FederationError>;

/// Errors that can occur while managing or signing for a federation
#[derive(Debug, Error)]
pub enum FederationError {
    /// Key construction, signing or encoding failed in the core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Operation needs at least one member
    #[error("Federation has no members")]
    EmptyFederation,

    /// Public key is already a member
    #[error("Duplicate federation member: {0}")]
    DuplicateMember(String),

    /// Public key is not a member
    #[error("Not a federation member: {0}")]
    NotAMember(String),

    /// Descriptor named private material but the built key has none
    #[error("Expected a private scalar for member {0}, none was produced")]
    MissingPrivateScalar(String),

    /// Named member is public-only
    #[error("Member {0} is not locally controlled")]
    MemberCannotSign(String),

    /// No member holds a private scalar
    #[error("No locally controlled member can sign")]
    NoLocalSigner,

    /// Threshold out of range for the member count
    #[error("Invalid threshold: {threshold} must be >= 1 and <= {members}")]
    InvalidThreshold { threshold: usize, members: usize },

    /// Script construction failed
    #[error("Invalid script: {0}")]
    InvalidScript(String),
}

impl FederationError {
    /// Whether this error means a member lacks signing capability
    pub fn is_capability_error(&self) -> bool {
        match self {
            FederationError::Core(e) => e.is_capability_error(),
            FederationError::MemberCannotSign(_)
            | FederationError::NoLocalSigner
            | FederationError::MissingPrivateScalar(_) => true,
            _ => false,
        }
    }
}
