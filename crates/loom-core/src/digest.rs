//! SHA-256 digests, the root of every identifier in Loom

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};

use crate::error::{CoreError, Result};
use crate::types::hex_bytes_32;

/// A 32-byte SHA-256 digest, displayed as 64 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(#[serde(with = "hex_bytes_32")] pub [u8; 32]);

impl Digest {
    /// Hash text or bytes
    pub fn hash(data: impl AsRef<[u8]>) -> Self {
        Self(sha256(data.as_ref()))
    }

    /// Hash a dynamically typed value.
    ///
    /// Only a string or an array of byte-sized integers is accepted. Every
    /// other shape is rejected instead of being coerced to text.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::hash(s)),
            Value::Array(items) => {
                let bytes = items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or(CoreError::InvalidDigestInput("array of non-bytes"))
                    })
                    .collect::<Result<Vec<u8>>>()?;
                Ok(Self::hash(bytes))
            }
            Value::Null => Err(CoreError::InvalidDigestInput("null")),
            Value::Bool(_) => Err(CoreError::InvalidDigestInput("boolean")),
            Value::Number(_) => Err(CoreError::InvalidDigestInput("number")),
            Value::Object(_) => Err(CoreError::InvalidDigestInput("object")),
        }
    }

    /// Create from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// The same digest with its byte order reversed (block-hash display order)
    pub fn reverse(&self) -> Self {
        let mut bytes = self.0;
        bytes.reverse();
        Self(bytes)
    }

    /// Short display format (first 4 bytes as hex)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hex digest of text or bytes
pub fn digest(data: impl AsRef<[u8]>) -> String {
    Digest::hash(data).to_hex()
}

/// Byte-reverse a digest.
///
/// A 64 character hex string is taken to already be a digest; anything
/// else is hashed first.
pub fn reverse(hex_or_input: &str) -> String {
    match Digest::from_hex(hex_or_input) {
        Ok(d) => d.reverse().to_hex(),
        Err(_) => Digest::hash(hex_or_input).reverse().to_hex(),
    }
}

/// Hash data using SHA256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple pieces of data using SHA256
pub fn sha256_multi(data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for d in data {
        hasher.update(d);
    }
    hasher.finalize().into()
}

/// BIP340 tagged hash: `SHA256(SHA256(tag) || SHA256(tag) || data...)`
pub fn tagged_hash(tag: &str, data: &[&[u8]]) -> [u8; 32] {
    let tag_hash = sha256(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    for d in data {
        hasher.update(d);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_text_and_bytes_agree() {
        assert_eq!(digest("abc"), digest(b"abc"));
        assert_eq!(
            Digest::from_value(&json!("abc")).unwrap(),
            Digest::from_value(&json!([97, 98, 99])).unwrap()
        );
    }

    #[test]
    fn test_rejects_other_shapes() {
        for value in [json!(null), json!(true), json!(42), json!({"a": 1}), json!([1, 300])] {
            let err = Digest::from_value(&value).unwrap_err();
            assert!(matches!(err, CoreError::InvalidDigestInput(_)));
        }
    }

    #[test]
    fn test_reverse() {
        let d = Digest::hash("abc");
        let reversed = d.reverse();
        assert_eq!(reversed.0[0], d.0[31]);
        assert_eq!(reversed.reverse(), d);
        assert_eq!(reverse(&d.to_hex()), reversed.to_hex());
        assert_eq!(reverse("abc"), reversed.to_hex());
    }

    #[test]
    fn test_hex_is_64_lowercase_chars() {
        let hex = digest("loom");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
