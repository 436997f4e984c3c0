//! Federation snapshots and the shared handle that publishes them

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use loom_core::key::address::p2tr;
use loom_core::{Digest, Key, KeyDescriptor, Network, PublicKey, SchnorrSignature};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{FederationError, Result};
use crate::multisig::{MessagePayload, MultiSigReport, MultiSignature};
use crate::taproot;

/// Recovery path that lets a single key spend after a relative timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutLeaf {
    pub blocks: u32,
    pub key: PublicKey,
}

/// Options for [`Federation::address`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressOptions {
    /// Required signers, defaulting to `ceil(n / 2)`
    pub threshold: Option<usize>,
    pub timeout: Option<TimeoutLeaf>,
    /// Raw tapscript added as an extra leaf
    #[serde(with = "loom_core::types::hex_vec_opt")]
    pub contract_script: Option<Vec<u8>>,
}

/// One leaf of the federation script tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLeaf {
    pub script: String,
    pub leaf_hash: Digest,
}

/// Taproot address committing to the federation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationAddress {
    pub address: String,
    pub threshold: usize,
    pub internal_key: String,
    pub output_key: String,
    pub merkle_root: Digest,
    pub leaves: Vec<ScriptLeaf>,
}

/// A signature made by one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSignature {
    pub member: PublicKey,
    pub signature: SchnorrSignature,
}

/// Immutable snapshot of the validator set.
///
/// `validators` keeps insertion order; every validator has an entry in
/// `keys`. Membership changes return a new snapshot with the generation
/// bumped.
#[derive(Debug, Clone)]
pub struct Federation {
    network: Network,
    validators: Vec<PublicKey>,
    keys: HashMap<PublicKey, Arc<Key>>,
    round: u64,
    generation: u64,
}

impl Federation {
    /// Empty federation at generation 0
    pub fn new(network: Network) -> Self {
        Self {
            network,
            validators: Vec::new(),
            keys: HashMap::new(),
            round: 0,
            generation: 0,
        }
    }

    /// Build a federation by adding each descriptor in order
    pub fn from_descriptors<'a>(
        network: Network,
        descriptors: impl IntoIterator<Item = &'a KeyDescriptor>,
    ) -> Result<Self> {
        descriptors
            .into_iter()
            .try_fold(Self::new(network), |federation, descriptor| {
                federation.add_member(descriptor)
            })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Compressed validator keys in membership order
    pub fn validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_member(&self, public_key: &PublicKey) -> bool {
        self.keys.contains_key(public_key)
    }

    pub fn member(&self, public_key: &PublicKey) -> Option<&Arc<Key>> {
        self.keys.get(public_key)
    }

    /// Default threshold: a majority rounded up
    pub fn default_threshold(&self) -> usize {
        self.validators.len().div_ceil(2)
    }

    /// Members holding a private scalar, in validator order
    pub fn local_members(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.validators
            .iter()
            .filter_map(|pk| self.keys.get(pk))
            .filter(|key| key.has_private())
    }

    /// Add a member built from `descriptor`, returning the next snapshot
    pub fn add_member(&self, descriptor: &KeyDescriptor) -> Result<Self> {
        let key = Key::from_descriptor(descriptor)?;
        if descriptor.expects_private() && !key.has_private() {
            return Err(FederationError::MissingPrivateScalar(key.public_key().to_hex()));
        }
        self.add_key(Arc::new(key))
    }

    /// Add an already-built key, returning the next snapshot
    pub fn add_key(&self, key: Arc<Key>) -> Result<Self> {
        let public_key = *key.public_key();
        if self.keys.contains_key(&public_key) {
            return Err(FederationError::DuplicateMember(public_key.to_hex()));
        }

        let mut next = self.clone();
        next.validators.push(public_key);
        next.keys.insert(public_key, key);
        next.generation += 1;

        debug!(
            member = %public_key,
            members = next.validators.len(),
            generation = next.generation,
            "Added federation member"
        );
        Ok(next)
    }

    /// Snapshot with the round clock advanced by one
    pub fn ticked(&self) -> Self {
        Self {
            round: self.round.saturating_add(1),
            ..self.clone()
        }
    }

    /// Sign with a named member, or the first locally controlled one
    pub fn sign(
        &self,
        message: impl AsRef<[u8]>,
        signer: Option<&PublicKey>,
    ) -> Result<MemberSignature> {
        let key = match signer {
            Some(public_key) => {
                let key = self
                    .keys
                    .get(public_key)
                    .ok_or_else(|| FederationError::NotAMember(public_key.to_hex()))?;
                if !key.has_private() {
                    return Err(FederationError::MemberCannotSign(public_key.to_hex()));
                }
                key
            }
            None => self
                .local_members()
                .next()
                .ok_or(FederationError::NoLocalSigner)?,
        };

        Ok(MemberSignature {
            member: *key.public_key(),
            signature: key.sign_schnorr(message)?,
        })
    }

    /// Whether any current member's key validates the signature
    pub fn verify(&self, message: impl AsRef<[u8]>, signature: &[u8]) -> bool {
        let message = message.as_ref();
        self.validators
            .iter()
            .filter_map(|pk| self.keys.get(pk))
            .any(|key| key.verify_schnorr(message, signature))
    }

    /// One signature per locally controlled member
    #[instrument(skip_all, fields(generation = self.generation))]
    pub fn create_multi_signature(&self, message: impl Into<MessagePayload>) -> Result<MultiSignature> {
        let message = message.into();
        let bytes = message.to_bytes();

        let mut signatures = std::collections::BTreeMap::new();
        for key in self.local_members() {
            signatures.insert(key.public_key().to_hex(), key.sign_schnorr(&bytes)?);
        }
        if signatures.is_empty() {
            return Err(FederationError::NoLocalSigner);
        }

        debug!(signers = signatures.len(), "Created multi-signature");
        Ok(MultiSignature {
            message,
            signatures,
        })
    }

    /// Check a multi-signature, stopping once `threshold` signatures verify
    pub fn verify_multi_signature(
        &self,
        multisig: &MultiSignature,
        threshold: usize,
    ) -> Result<MultiSigReport> {
        self.evaluate(multisig, threshold, true)
    }

    /// Evaluate every signature without stopping early
    pub fn tally_multi_signature(
        &self,
        multisig: &MultiSignature,
        threshold: usize,
    ) -> Result<MultiSigReport> {
        self.evaluate(multisig, threshold, false)
    }

    fn evaluate(
        &self,
        multisig: &MultiSignature,
        threshold: usize,
        stop_at_threshold: bool,
    ) -> Result<MultiSigReport> {
        if threshold == 0 {
            return Err(FederationError::InvalidThreshold {
                threshold,
                members: self.len(),
            });
        }

        let bytes = multisig.message.to_bytes();
        let mut report = MultiSigReport {
            threshold,
            ..MultiSigReport::default()
        };

        let mut counted = HashSet::new();
        for (member, signature) in &multisig.signatures {
            if stop_at_threshold && report.is_satisfied() {
                break;
            }
            let Some((public_key, key)) = PublicKey::from_hex(member)
                .ok()
                .and_then(|pk| self.keys.get_key_value(&pk))
            else {
                debug!(member = %member, "Signature from unknown member not evaluated");
                report.unknown_members.push(member.clone());
                continue;
            };

            // One share per member, filed under its compressed lowercase hex
            if public_key.to_hex() != *member || counted.contains(public_key) {
                warn!(member = %member, "Ignored aliased multi-signature share");
                report.aliased.push(member.clone());
                continue;
            }

            if key.verify_schnorr(&bytes, signature.as_bytes()) {
                counted.insert(*public_key);
                report.valid.push(member.clone());
            } else {
                warn!(member = %member, "Rejected multi-signature share");
                report.invalid.push(member.clone());
            }
        }

        Ok(report)
    }

    /// Taproot address over an m-of-n CHECKSIGADD script of all members
    #[instrument(skip_all, fields(members = self.len()))]
    pub fn address(&self, options: &AddressOptions) -> Result<FederationAddress> {
        let internal = self
            .validators
            .first()
            .ok_or(FederationError::EmptyFederation)?
            .x_only();
        let threshold = options.threshold.unwrap_or_else(|| self.default_threshold());

        let keys: Vec<[u8; 32]> = self.validators.iter().map(|pk| pk.x_only()).collect();
        let mut scripts = vec![taproot::multisig_script(&keys, threshold)?];
        if let Some(timeout) = &options.timeout {
            scripts.push(taproot::timeout_script(timeout.blocks, &timeout.key.x_only())?);
        }
        if let Some(contract) = &options.contract_script {
            if contract.is_empty() {
                return Err(FederationError::InvalidScript(
                    "contract script is empty".to_string(),
                ));
            }
            scripts.push(contract.clone());
        }

        let leaf_hashes: Vec<[u8; 32]> = scripts.iter().map(|s| taproot::leaf_hash(s)).collect();
        let merkle_root = taproot::tree_root(&leaf_hashes).ok_or(FederationError::EmptyFederation)?;
        let output_key = taproot::output_key(&internal, Some(&merkle_root))?;
        let address = p2tr(&output_key, self.network)?;

        debug!(%address, threshold, leaves = scripts.len(), "Derived federation address");
        Ok(FederationAddress {
            address,
            threshold,
            internal_key: hex::encode(internal),
            output_key: hex::encode(output_key),
            merkle_root: Digest::new(merkle_root),
            leaves: scripts
                .iter()
                .zip(leaf_hashes)
                .map(|(script, hash)| ScriptLeaf {
                    script: hex::encode(script),
                    leaf_hash: Digest::new(hash),
                })
                .collect(),
        })
    }
}

/// Shared, swappable federation snapshot.
///
/// Readers clone the current `Arc`; membership changes and ticks build the
/// next snapshot and replace it under the write lock.
#[derive(Debug)]
pub struct SharedFederation {
    current: RwLock<Arc<Federation>>,
}

impl SharedFederation {
    pub fn new(federation: Federation) -> Self {
        Self {
            current: RwLock::new(Arc::new(federation)),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Federation> {
        // Snapshots are replaced whole, so a poisoned lock still holds a valid one
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Add a member and publish the resulting snapshot
    pub fn add_member(&self, descriptor: &KeyDescriptor) -> Result<Arc<Federation>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(guard.add_member(descriptor)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }

    /// Advance the round clock, returning the new round
    pub fn tick(&self) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = guard.ticked();
        let round = next.round();
        *guard = Arc::new(next);
        round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local(n: u8) -> KeyDescriptor {
        KeyDescriptor::private(hex::encode([n; 32]))
    }

    fn federation(n: u8) -> Federation {
        Federation::from_descriptors(Network::Mainnet, &(1..=n).map(local).collect::<Vec<_>>())
            .unwrap()
    }

    #[test]
    fn test_add_member_bumps_generation() {
        let empty = Federation::new(Network::Mainnet);
        let one = empty.add_member(&local(1)).unwrap();
        assert_eq!(empty.len(), 0);
        assert_eq!(one.len(), 1);
        assert_eq!(one.generation(), 1);
        assert!(one.is_member(&one.validators()[0]));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let fed = federation(2);
        let err = fed.add_member(&local(1)).unwrap_err();
        assert!(matches!(err, FederationError::DuplicateMember(_)));
    }

    #[test]
    fn test_sign_selection() {
        let owner = Key::from_private_hex(&hex::encode([9u8; 32]), Network::Mainnet).unwrap();
        let fed = Federation::new(Network::Mainnet)
            .add_member(&KeyDescriptor::public(owner.public_key().to_hex()))
            .unwrap()
            .add_member(&local(2))
            .unwrap();

        let signed = fed.sign(b"msg", None).unwrap();
        assert_eq!(signed.member, fed.validators()[1]);
        assert!(fed.verify(b"msg", signed.signature.as_bytes()));

        let err = fed.sign(b"msg", Some(&fed.validators()[0])).unwrap_err();
        assert!(matches!(err, FederationError::MemberCannotSign(_)));
        assert!(err.is_capability_error());

        let outsider = *Key::random(Network::Mainnet).unwrap().public_key();
        assert!(matches!(
            fed.sign(b"msg", Some(&outsider)),
            Err(FederationError::NotAMember(_))
        ));
    }

    #[test]
    fn test_sign_without_local_members() {
        let owner = Key::random(Network::Mainnet).unwrap();
        let fed = Federation::new(Network::Mainnet)
            .add_member(&KeyDescriptor::public(owner.public_key().to_hex()))
            .unwrap();
        assert!(matches!(fed.sign(b"m", None), Err(FederationError::NoLocalSigner)));
        assert!(matches!(
            fed.create_multi_signature("m"),
            Err(FederationError::NoLocalSigner)
        ));
    }

    #[test]
    fn test_multisig_threshold_monotonic() {
        let fed = federation(5);
        let multisig = fed.create_multi_signature("vote").unwrap();
        assert_eq!(multisig.len(), 5);

        for threshold in 1..=5 {
            assert!(fed.verify_multi_signature(&multisig, threshold).unwrap().is_satisfied());
        }
        assert!(!fed.verify_multi_signature(&multisig, 6).unwrap().is_satisfied());
        assert!(fed.verify_multi_signature(&multisig, 0).is_err());
    }

    #[test]
    fn test_verify_stops_at_threshold() {
        let fed = federation(4);
        let multisig = fed.create_multi_signature("vote").unwrap();
        let report = fed.verify_multi_signature(&multisig, 2).unwrap();
        assert_eq!(report.valid_count(), 2);
        assert_eq!(fed.tally_multi_signature(&multisig, 2).unwrap().valid_count(), 4);
    }

    #[test]
    fn test_corrupted_signature_counts_once() {
        let fed = federation(3);
        let mut multisig = fed.create_multi_signature(json!({"round": 1})).unwrap();
        let victim = multisig.signatures.keys().next().unwrap().clone();
        multisig.signatures.get_mut(&victim).unwrap().0[10] ^= 0x01;

        let report = fed.tally_multi_signature(&multisig, 3).unwrap();
        assert_eq!(report.valid_count(), 2);
        assert_eq!(report.invalid, vec![victim]);
        assert!(!report.is_satisfied());
    }

    #[test]
    fn test_member_counts_once_under_any_spelling() {
        use k256::elliptic_curve::sec1::ToEncodedPoint;

        let fed = federation(3);
        let signer = &fed.validators()[0];
        let share = fed.sign("vote", Some(signer)).unwrap().signature;

        let uncompressed = hex::encode(
            signer
                .to_k256()
                .unwrap()
                .to_encoded_point(false)
                .as_bytes(),
        );
        let mut multisig = MultiSignature {
            message: MessagePayload::from("vote"),
            signatures: Default::default(),
        };
        for spelling in [signer.to_hex(), signer.to_hex().to_uppercase(), uncompressed] {
            multisig.signatures.insert(spelling, share);
        }

        for report in [
            fed.verify_multi_signature(&multisig, 3).unwrap(),
            fed.tally_multi_signature(&multisig, 2).unwrap(),
        ] {
            assert_eq!(report.valid, vec![signer.to_hex()]);
            assert_eq!(report.aliased.len(), 2);
            assert!(report.invalid.is_empty());
            assert!(!report.is_satisfied());
        }
    }

    #[test]
    fn test_unknown_member_is_not_invalid() {
        let fed = federation(2);
        let stranger = Key::random(Network::Mainnet).unwrap();
        let mut multisig = fed.create_multi_signature("m").unwrap();
        multisig.signatures.insert(
            stranger.public_key().to_hex(),
            stranger.sign_schnorr(b"m").unwrap(),
        );
        multisig
            .signatures
            .insert("not-a-key".to_string(), SchnorrSignature::new([0u8; 64]));

        let report = fed.tally_multi_signature(&multisig, 2).unwrap();
        assert_eq!(report.valid_count(), 2);
        assert!(report.invalid.is_empty());
        assert_eq!(report.unknown_members.len(), 2);
    }

    #[test]
    fn test_address_shape_and_determinism() {
        let fed = federation(3);
        let a = fed.address(&AddressOptions::default()).unwrap();
        let b = fed.address(&AddressOptions::default()).unwrap();
        assert_eq!(a, b);
        assert!(a.address.starts_with("bc1p"));
        assert_eq!(a.threshold, 2);
        assert_eq!(a.leaves.len(), 1);
        assert_eq!(a.internal_key, hex::encode(fed.validators()[0].x_only()));

        let with_timeout = fed
            .address(&AddressOptions {
                timeout: Some(TimeoutLeaf {
                    blocks: 144,
                    key: fed.validators()[0],
                }),
                contract_script: Some(vec![taproot::OP_1]),
                ..AddressOptions::default()
            })
            .unwrap();
        assert_eq!(with_timeout.leaves.len(), 3);
        assert_ne!(with_timeout.address, a.address);
    }

    #[test]
    fn test_address_errors() {
        assert!(matches!(
            Federation::new(Network::Mainnet).address(&AddressOptions::default()),
            Err(FederationError::EmptyFederation)
        ));
        let fed = federation(2);
        let err = fed
            .address(&AddressOptions {
                threshold: Some(3),
                ..AddressOptions::default()
            })
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidThreshold { .. }));
    }

    #[test]
    fn test_shared_handle_swaps_snapshots() {
        let shared = SharedFederation::new(federation(1));
        let before = shared.snapshot();

        let after = shared.add_member(&local(7)).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(shared.snapshot().generation(), 2);

        assert_eq!(shared.tick(), 1);
        assert_eq!(shared.tick(), 2);
        assert_eq!(shared.snapshot().round(), 2);
        assert_eq!(shared.snapshot().generation(), 2);
    }
}
