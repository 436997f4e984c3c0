//! Loom Federation - threshold signing over a dynamic validator set
//!
//! A [`Federation`] is an immutable snapshot of member keys. Membership
//! changes produce the next snapshot; [`SharedFederation`] publishes the
//! current one to concurrent readers.
//!
//! Members sign with BIP340 Schnorr. A [`MultiSignature`] gathers one
//! signature per locally controlled member and is checked against an m-of-n
//! threshold. The federation address is a taproot output committing to a
//! `CHECKSIGADD` script over every member.

pub mod error;
pub mod federation;
pub mod multisig;
pub mod taproot;

pub use error::{FederationError, Result};
pub use federation::{
    AddressOptions, Federation, FederationAddress, MemberSignature, ScriptLeaf, SharedFederation,
    TimeoutLeaf,
};
pub use multisig::{MessagePayload, MultiSigReport, MultiSignature};
