//! Content-addressed entities
//!
//! An entity is an immutable snapshot of a JSON value. Its id is
//! `Digest(canonical({"type": "Entity", "data": value}))`; signing or any
//! other change produces a new entity.

use serde::Serialize;
use serde_json::{json, Value};

use crate::canonical::{encode_value, to_canonical_bytes};
use crate::digest::Digest;
use crate::error::Result;
use crate::key::{verify_schnorr_x_only, Key};
use crate::types::{PublicKey, SchnorrSignature};

/// Type tag folded into every entity id
pub const ENTITY_TYPE: &str = "Entity";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    id: Digest,
    data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<SchnorrSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signer: Option<PublicKey>,
}

impl Entity {
    /// Snapshot any serializable value
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_value(serde_json::to_value(value)?))
    }

    /// Snapshot an already-built JSON value
    pub fn from_value(data: Value) -> Self {
        let id = Digest::hash(encode_value(&json!({
            "type": ENTITY_TYPE,
            "data": &data,
        })));
        Self {
            id,
            data,
            signature: None,
            signer: None,
        }
    }

    pub fn id(&self) -> Digest {
        self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn signature(&self) -> Option<&SchnorrSignature> {
        self.signature.as_ref()
    }

    pub fn signer(&self) -> Option<&PublicKey> {
        self.signer.as_ref()
    }

    /// Canonical bytes of the data, the preimage for signing
    pub fn to_buffer(&self) -> Vec<u8> {
        encode_value(&self.data)
    }

    /// Signed copy of this entity; the key must hold a private scalar
    pub fn sign(&self, key: &Key) -> Result<Self> {
        let signature = key.sign_schnorr(self.to_buffer())?;
        Ok(Self {
            signature: Some(signature),
            signer: Some(*key.public_key()),
            ..self.clone()
        })
    }

    /// Check the attached signature against the attached signer.
    ///
    /// Unsigned entities do not verify.
    pub fn verify(&self) -> bool {
        match (&self.signature, &self.signer) {
            (Some(signature), Some(signer)) => {
                verify_schnorr_x_only(&signer.x_only(), &self.to_buffer(), signature.as_bytes())
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Id a value would get as an entity, without keeping the snapshot
pub fn entity_id<T: Serialize + ?Sized>(value: &T) -> Result<Digest> {
    let data = serde_json::to_value(value)?;
    Ok(Digest::hash(to_canonical_bytes(&json!({
        "type": ENTITY_TYPE,
        "data": data,
    }))?))
}
