//! Loom Core - Digests, entities, Merkle trees and hierarchical keys
//!
//! This crate provides the primitives every other Loom crate builds on:
//! content addressing, canonical encoding, BIP32 key management with
//! Bitcoin-style addresses, Schnorr and ECDSA signing, and symmetric
//! encryption for key holders.

pub mod canonical;
pub mod digest;
pub mod entity;
pub mod error;
pub mod key;
pub mod merkle;
pub mod types;

pub use canonical::{encode_value, to_canonical_bytes};
pub use digest::{digest, reverse, Digest};
pub use entity::{entity_id, Entity};
pub use error::{CoreError, Result};
pub use key::{
    verify_schnorr_x_only, AddressKind, DerivationPath, DerivedAddress, Key, KeyDescriptor,
    KeyMaterial, KeyMode, KeyOptions,
};
pub use merkle::{MerkleProof, MerkleTree};
pub use types::{Network, PublicKey, SchnorrSignature};
