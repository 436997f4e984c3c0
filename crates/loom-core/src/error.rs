//! Error types for loom-core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core primitives.
///
/// Input-shape errors and capability errors are kept as separate variants
/// so callers can branch on "only holds a public key" versus "bad input".
/// Failed signature verification is never an error; it is a `false`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Value handed to the digest was neither text nor bytes
    #[error("Digest input must be text or bytes, got {0}")]
    InvalidDigestInput(&'static str),

    /// Hex decoding failed
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Derivation path could not be parsed
    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// Seed phrase failed word list or checksum validation
    #[error("Invalid seed phrase: {0}")]
    InvalidSeedPhrase(String),

    /// Extended key string could not be decoded
    #[error("Invalid extended key: {0}")]
    InvalidExtendedKey(String),

    /// Private scalar or public point was malformed
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Signature bytes were structurally malformed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// Ciphertext was not `ivHex:cipherHex` or failed authentication
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Address encoding failed
    #[error("Address encoding error: {0}")]
    Address(String),

    /// Merkle proof request out of range
    #[error("Merkle tree error: {0}")]
    MerkleTree(String),

    /// Signing or decrypting requires a private scalar
    #[error("Key has no private scalar")]
    MissingPrivateKey,

    /// Derivation requires a master chain
    #[error("Cannot derive without a master key")]
    MissingMasterKey,

    /// Hardened derivation requested from public-only material
    #[error("Cannot derive hardened child {0} from a public key")]
    HardenedFromPublic(String),

    /// Private material has been erased by `secure()`
    #[error("Key material has been secured and erased")]
    KeySecured,

    /// Internal cryptographic failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl CoreError {
    /// Whether this error means the key lacks the capability for the operation
    pub fn is_capability_error(&self) -> bool {
        matches!(
            self,
            CoreError::MissingPrivateKey
                | CoreError::MissingMasterKey
                | CoreError::HardenedFromPublic(_)
                | CoreError::KeySecured
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Encoding(e.to_string())
    }
}
