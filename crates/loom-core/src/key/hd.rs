//! Hierarchical Deterministic (HD) key derivation
//!
//! BIP32 child key derivation over secp256k1 with HMAC-SHA512, plus the
//! base58check `xprv`/`xpub` serialization used to restore keys.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, ProjectivePoint, Scalar, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::address::hash160;
use crate::error::{CoreError, Result};
use crate::types::{Network, PublicKey};

type HmacSha512 = Hmac<Sha512>;

/// Length of a serialized extended key before base58check
const EXTENDED_KEY_LEN: usize = 78;

/// HD derivation path component
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PathComponent {
    /// Index value
    pub index: u32,
    /// Whether this is a hardened derivation
    pub hardened: bool,
}

impl PathComponent {
    /// Bit marking a hardened index
    pub const HARDENED: u32 = 0x80000000;

    /// Create a normal (non-hardened) component
    pub fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }

    /// Create a hardened component
    pub fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    /// Get the value to use in derivation (adds 2^31 for hardened)
    pub fn value(&self) -> u32 {
        if self.hardened {
            self.index | Self::HARDENED
        } else {
            self.index
        }
    }

    /// Split a raw child number back into a component
    pub fn from_value(value: u32) -> Self {
        Self {
            index: value & !Self::HARDENED,
            hardened: value & Self::HARDENED != 0,
        }
    }
}

impl std::fmt::Display for PathComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// HD derivation path (e.g., m/44'/0'/0'/0/0)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    pub components: Vec<PathComponent>,
}

impl DerivationPath {
    /// Create a new derivation path
    pub fn new(components: Vec<PathComponent>) -> Self {
        Self { components }
    }

    /// Full BIP44-style path: m/purpose'/coin_type'/account'/change/index
    pub fn bip44(purpose: u32, coin_type: u32, account: u32, change: u32, index: u32) -> Self {
        Self {
            components: vec![
                PathComponent::hardened(purpose),
                PathComponent::hardened(coin_type),
                PathComponent::hardened(account),
                PathComponent::normal(change),
                PathComponent::normal(index),
            ],
        }
    }

    /// Path relative to an account-level key: change/index
    pub fn relative(change: u32, index: u32) -> Self {
        Self {
            components: vec![PathComponent::normal(change), PathComponent::normal(index)],
        }
    }

    /// Number of derivation steps
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Whether any step is hardened
    pub fn has_hardened(&self) -> bool {
        self.components.iter().any(|c| c.hardened)
    }

    /// Convert to string representation (e.g., "m/44'/0'/0'/0/0")
    pub fn to_string_path(&self) -> String {
        let mut s = String::from("m");
        for component in &self.components {
            s.push('/');
            s.push_str(&component.to_string());
        }
        s
    }
}

impl std::fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_path())
    }
}

impl std::str::FromStr for DerivationPath {
    type Err = CoreError;

    /// Parse `m/44'/0'/0'/0/1`. The leading `m` is optional and hardened
    /// steps may be marked with `'`, `h` or `H`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidDerivationPath("empty path".to_string()));
        }

        let mut parts = trimmed.split('/').peekable();
        if matches!(parts.peek(), Some(&"m") | Some(&"M")) {
            parts.next();
        }

        let mut components = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoreError::InvalidDerivationPath(format!(
                    "bad component '{}' in '{}'",
                    part, s
                )));
            }
            let index: u32 = digits.parse().map_err(|_| {
                CoreError::InvalidDerivationPath(format!("component '{}' out of range", part))
            })?;
            if index >= PathComponent::HARDENED {
                return Err(CoreError::InvalidDerivationPath(format!(
                    "component '{}' out of range",
                    part
                )));
            }
            components.push(PathComponent { index, hardened });
        }

        Ok(Self { components })
    }
}

/// Fingerprint of a public key: first four bytes of HASH160
pub fn fingerprint(public_key: &PublicKey) -> [u8; 4] {
    let hash = hash160(public_key.as_bytes());
    let mut fp = [0u8; 4];
    fp.copy_from_slice(&hash[..4]);
    fp
}

/// Extended private key (secret scalar + chain code + position metadata)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExtendedPrivKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: u32,
}

impl std::fmt::Debug for ExtendedPrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedPrivKey")
            .field("secret", &"[REDACTED]")
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .finish()
    }
}

impl ExtendedPrivKey {
    /// Master key from seed bytes (16 to 64 bytes)
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(CoreError::InvalidKeyMaterial(format!(
                "seed must be 16..=64 bytes, got {}",
                seed.len()
            )));
        }

        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        mac.update(seed);
        let mut output = [0u8; 64];
        output.copy_from_slice(&mac.finalize().into_bytes());

        let result = Self::from_parts(&output, 0, [0u8; 4], 0);
        output.zeroize();
        result
    }

    fn from_parts(
        output: &[u8; 64],
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: u32,
    ) -> Result<Self> {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&output[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        // Reject zero or out-of-range scalars
        parse_nonzero_scalar(&secret)?;

        Ok(Self {
            secret,
            chain_code,
            depth,
            parent_fingerprint,
            child_number,
        })
    }

    /// Secret scalar bytes (use with caution!)
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn child_number(&self) -> u32 {
        self.child_number
    }

    /// The secret as a k256 key
    pub fn secret_key(&self) -> Result<SecretKey> {
        SecretKey::from_slice(&self.secret)
            .map_err(|e| CoreError::InvalidKeyMaterial(e.to_string()))
    }

    /// Compressed public key for this node
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_k256(&self.secret_key()?.public_key())
    }

    /// Neutered counterpart
    pub fn to_extended_public(&self) -> Result<ExtendedPubKey> {
        Ok(ExtendedPubKey {
            public_key: self.public_key()?,
            chain_code: self.chain_code,
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_number: self.child_number,
        })
    }

    /// Derive one child (CKDpriv)
    pub fn derive_step(&self, component: PathComponent) -> Result<Self> {
        let parent_public = self.public_key()?;
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        if component.hardened {
            mac.update(&[0u8]);
            mac.update(&self.secret);
        } else {
            mac.update(parent_public.as_bytes());
        }
        mac.update(&component.value().to_be_bytes());

        let mut output = [0u8; 64];
        output.copy_from_slice(&mac.finalize().into_bytes());
        let mut il = [0u8; 32];
        il.copy_from_slice(&output[..32]);

        let tweak = parse_scalar(&il)?;
        let parent = parse_nonzero_scalar(&self.secret)?;
        let child = tweak + parent;
        il.zeroize();

        if bool::from(child.is_zero()) {
            output.zeroize();
            return Err(CoreError::Crypto(format!(
                "derived zero key at index {}",
                component
            )));
        }

        let child_secret: [u8; 32] = child.to_bytes().into();
        output[..32].copy_from_slice(&child_secret);

        let derived = Self::from_parts(
            &output,
            self.depth.saturating_add(1),
            fingerprint(&parent_public),
            component.value(),
        );
        output.zeroize();
        derived
    }

    /// Derive along a whole path
    pub fn derive(&self, path: &DerivationPath) -> Result<Self> {
        let mut current = self.clone();
        for component in &path.components {
            current = current.derive_step(*component)?;
        }
        Ok(current)
    }

    /// Base58check serialization (`xprv...` / `tprv...`)
    pub fn encode(&self, network: Network) -> String {
        let mut key_data = [0u8; 33];
        key_data[1..].copy_from_slice(&self.secret);
        let mut raw = serialize_extended(
            network.xprv_version(),
            self.depth,
            self.parent_fingerprint,
            self.child_number,
            &self.chain_code,
            &key_data,
        );
        let encoded = bs58::encode(&raw).with_check().into_string();
        raw.zeroize();
        key_data.zeroize();
        encoded
    }

    /// Parse a base58check `xprv`/`tprv` string
    pub fn decode(s: &str) -> Result<(Self, Network)> {
        let mut raw = decode_extended(s)?;
        let version: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        let network = if version == Network::Mainnet.xprv_version() {
            Network::Mainnet
        } else if version == Network::Testnet.xprv_version() {
            Network::Testnet
        } else {
            raw.zeroize();
            return Err(CoreError::InvalidExtendedKey(format!(
                "not an extended private key (version {})",
                hex::encode(version)
            )));
        };

        if raw[45] != 0x00 {
            raw.zeroize();
            return Err(CoreError::InvalidExtendedKey(
                "private key data must start with 0x00".to_string(),
            ));
        }

        let mut output = [0u8; 64];
        output[..32].copy_from_slice(&raw[46..78]);
        output[32..].copy_from_slice(&raw[13..45]);
        let result = Self::from_parts(
            &output,
            raw[4],
            [raw[5], raw[6], raw[7], raw[8]],
            u32::from_be_bytes([raw[9], raw[10], raw[11], raw[12]]),
        );
        output.zeroize();
        raw.zeroize();
        Ok((result?, network))
    }
}

/// Extended public key (point + chain code + position metadata)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPubKey {
    public_key: PublicKey,
    chain_code: [u8; 32],
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: u32,
}

impl ExtendedPubKey {
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Derive one non-hardened child (CKDpub)
    pub fn derive_step(&self, component: PathComponent) -> Result<Self> {
        if component.hardened {
            return Err(CoreError::HardenedFromPublic(component.to_string()));
        }

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        mac.update(self.public_key.as_bytes());
        mac.update(&component.value().to_be_bytes());
        let mut output = [0u8; 64];
        output.copy_from_slice(&mac.finalize().into_bytes());

        let mut il = [0u8; 32];
        il.copy_from_slice(&output[..32]);
        let tweak = parse_scalar(&il)?;

        let parent = ProjectivePoint::from(*self.public_key.to_k256()?.as_affine());
        let child = ProjectivePoint::GENERATOR * tweak + parent;
        let child = k256::PublicKey::from_affine(child.to_affine()).map_err(|_| {
            CoreError::Crypto(format!("derived point at infinity at index {}", component))
        })?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(Self {
            public_key: PublicKey::from_k256(&child)?,
            chain_code,
            depth: self.depth.saturating_add(1),
            parent_fingerprint: fingerprint(&self.public_key),
            child_number: component.value(),
        })
    }

    /// Derive along a whole path; every step must be non-hardened
    pub fn derive(&self, path: &DerivationPath) -> Result<Self> {
        let mut current = self.clone();
        for component in &path.components {
            current = current.derive_step(*component)?;
        }
        Ok(current)
    }

    /// Base58check serialization (`xpub...` / `tpub...`)
    pub fn encode(&self, network: Network) -> String {
        let raw = serialize_extended(
            network.xpub_version(),
            self.depth,
            self.parent_fingerprint,
            self.child_number,
            &self.chain_code,
            self.public_key.as_bytes(),
        );
        bs58::encode(&raw).with_check().into_string()
    }

    /// Parse a base58check `xpub`/`tpub` string
    pub fn decode(s: &str) -> Result<(Self, Network)> {
        let raw = decode_extended(s)?;
        let version: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        let network = if version == Network::Mainnet.xpub_version() {
            Network::Mainnet
        } else if version == Network::Testnet.xpub_version() {
            Network::Testnet
        } else {
            return Err(CoreError::InvalidExtendedKey(format!(
                "not an extended public key (version {})",
                hex::encode(version)
            )));
        };

        let public_key = PublicKey::from_sec1(&raw[45..78])
            .map_err(|e| CoreError::InvalidExtendedKey(e.to_string()))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&raw[13..45]);

        Ok((
            Self {
                public_key,
                chain_code,
                depth: raw[4],
                parent_fingerprint: [raw[5], raw[6], raw[7], raw[8]],
                child_number: u32::from_be_bytes([raw[9], raw[10], raw[11], raw[12]]),
            },
            network,
        ))
    }
}

fn serialize_extended(
    version: [u8; 4],
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: u32,
    chain_code: &[u8; 32],
    key_data: &[u8; 33],
) -> Vec<u8> {
    let mut raw = Vec::with_capacity(EXTENDED_KEY_LEN);
    raw.extend_from_slice(&version);
    raw.push(depth);
    raw.extend_from_slice(&parent_fingerprint);
    raw.extend_from_slice(&child_number.to_be_bytes());
    raw.extend_from_slice(chain_code);
    raw.extend_from_slice(key_data);
    raw
}

fn decode_extended(s: &str) -> Result<Vec<u8>> {
    let raw = bs58::decode(s.trim())
        .with_check(None)
        .into_vec()
        .map_err(|e| CoreError::InvalidExtendedKey(e.to_string()))?;
    if raw.len() != EXTENDED_KEY_LEN {
        return Err(CoreError::InvalidExtendedKey(format!(
            "expected {} bytes, got {}",
            EXTENDED_KEY_LEN,
            raw.len()
        )));
    }
    Ok(raw)
}

/// Interpret 32 big-endian bytes as a scalar below the curve order
pub(crate) fn parse_scalar(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(*bytes)))
        .ok_or_else(|| CoreError::Crypto("scalar exceeds curve order".to_string()))
}

pub(crate) fn parse_nonzero_scalar(bytes: &[u8; 32]) -> Result<Scalar> {
    let scalar = parse_scalar(bytes)?;
    if bool::from(scalar.is_zero()) {
        return Err(CoreError::InvalidKeyMaterial("zero scalar".to_string()));
    }
    Ok(scalar)
}
