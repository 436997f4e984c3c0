//! Multi-signatures: one Schnorr signature per member over a shared message

use std::collections::BTreeMap;

use loom_core::{encode_value, SchnorrSignature};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message accepted for multi-signing, normalized to bytes before hashing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", from = "Value")]
pub enum MessagePayload {
    /// Raw bytes, signed as-is
    Bytes(Vec<u8>),
    /// Text, signed as its UTF-8 bytes
    Text(String),
    /// `{"message": inner}`, signed as the inner payload
    Wrapped(Box<MessagePayload>),
    /// Any other JSON value, signed as its canonical encoding
    Structured(Value),
}

impl MessagePayload {
    /// Bytes that are hashed and signed
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MessagePayload::Bytes(bytes) => bytes.clone(),
            MessagePayload::Text(text) => text.as_bytes().to_vec(),
            MessagePayload::Wrapped(inner) => inner.to_bytes(),
            MessagePayload::Structured(value) => encode_value(value),
        }
    }

    /// Classify a JSON value.
    ///
    /// Strings are text, arrays of byte-sized integers are bytes, an object
    /// whose only key is `message` is a wrapper, anything else is structured.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => MessagePayload::Text(text),
            Value::Array(items) => match as_byte_array(&items) {
                Some(bytes) => MessagePayload::Bytes(bytes),
                None => MessagePayload::Structured(Value::Array(items)),
            },
            Value::Object(mut map) if map.len() == 1 && map.contains_key("message") => {
                match map.remove("message") {
                    Some(inner) => MessagePayload::Wrapped(Box::new(Self::from_json(inner))),
                    None => MessagePayload::Structured(Value::Object(map)),
                }
            }
            other => MessagePayload::Structured(other),
        }
    }
}

fn as_byte_array(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

impl From<MessagePayload> for Value {
    fn from(payload: MessagePayload) -> Self {
        match payload {
            MessagePayload::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
            MessagePayload::Text(text) => Value::String(text),
            MessagePayload::Wrapped(inner) => {
                let mut map = Map::new();
                map.insert("message".to_string(), Value::from(*inner));
                Value::Object(map)
            }
            MessagePayload::Structured(value) => value,
        }
    }
}

impl From<Value> for MessagePayload {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        MessagePayload::Text(text.to_string())
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        MessagePayload::Text(text)
    }
}

impl From<&[u8]> for MessagePayload {
    fn from(bytes: &[u8]) -> Self {
        MessagePayload::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for MessagePayload {
    fn from(bytes: Vec<u8>) -> Self {
        MessagePayload::Bytes(bytes)
    }
}

/// A message and the signatures gathered for it, keyed by member public key hex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSignature {
    pub message: MessagePayload,
    pub signatures: BTreeMap<String, SchnorrSignature>,
}

impl MultiSignature {
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Outcome of checking a multi-signature against a threshold.
///
/// `unknown_members` lists signatures that could not be evaluated because
/// the claimed signer is not a current member; they are neither valid nor
/// invalid. `aliased` lists entries filed under any spelling of a member
/// key other than its compressed lowercase hex; they are never counted, so
/// each member contributes at most one valid signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSigReport {
    pub threshold: usize,
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    pub unknown_members: Vec<String>,
    #[serde(default)]
    pub aliased: Vec<String>,
}

impl MultiSigReport {
    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    /// Whether at least `threshold` signatures verified
    pub fn is_satisfied(&self) -> bool {
        self.valid.len() >= self.threshold
    }
}
