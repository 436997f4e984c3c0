//! Hierarchical key management.
//!
//! A [`Key`] is built from exactly one [`KeyMaterial`] variant, resolved
//! once from a [`KeyDescriptor`] in priority order: seed phrase, xprv,
//! xpub, raw private scalar, raw public point, otherwise random.
//!
//! Keys without a private scalar can verify and encrypt-for but never
//! sign or decrypt; those calls return capability errors.

pub mod address;
pub mod cipher;
pub mod hd;

use std::sync::Mutex;

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{schnorr, ProjectivePoint, Scalar, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zeroize::{Zeroize, Zeroizing};

use crate::digest::{tagged_hash, Digest};
use crate::error::{CoreError, Result};
use crate::types::{Network, PublicKey, SchnorrSignature};

pub use address::{AddressKind, DerivedAddress};
pub use cipher::IvStream;
pub use hd::{DerivationPath, ExtendedPrivKey, ExtendedPubKey, PathComponent};

/// Default BIP44 purpose
pub const DEFAULT_PURPOSE: u32 = 44;

/// Key material a [`Key`] is built from
pub enum KeyMaterial {
    /// BIP39 mnemonic
    SeedPhrase(Zeroizing<String>),
    /// Base58check extended private key
    Xprv(Zeroizing<String>),
    /// Base58check extended public key
    Xpub(String),
    /// 32-byte private scalar as hex
    PrivateScalar(Zeroizing<String>),
    /// SEC1 public point as hex
    PublicPoint(String),
    /// Fresh random key
    Random,
}

impl KeyMaterial {
    pub fn mode(&self) -> KeyMode {
        match self {
            KeyMaterial::SeedPhrase(_) => KeyMode::SeedPhrase,
            KeyMaterial::Xprv(_) => KeyMode::Xprv,
            KeyMaterial::Xpub(_) => KeyMode::Xpub,
            KeyMaterial::PrivateScalar(_) => KeyMode::PrivateScalar,
            KeyMaterial::PublicPoint(_) => KeyMode::PublicPoint,
            KeyMaterial::Random => KeyMode::Random,
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Xpub(s) => f.debug_tuple("Xpub").field(s).finish(),
            KeyMaterial::PublicPoint(s) => f.debug_tuple("PublicPoint").field(s).finish(),
            other => write!(f, "{:?}([REDACTED])", other.mode()),
        }
    }
}

/// Which construction mode produced a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    SeedPhrase,
    Xprv,
    Xpub,
    PrivateScalar,
    PublicPoint,
    Random,
}

/// Network and derivation path settings carried by a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    pub network: Network,
    pub purpose: u32,
    pub account: u32,
    pub index: u32,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            purpose: DEFAULT_PURPOSE,
            account: 0,
            index: 0,
        }
    }
}

impl KeyOptions {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }
}

/// Serializable key description, as found in configuration files.
///
/// Secret fields are plain strings; [`KeyDescriptor::material`] copies them
/// into zeroizing buffers for key construction.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDescriptor {
    pub network: Network,
    pub seed: Option<String>,
    pub xprv: Option<String>,
    pub xpub: Option<String>,
    pub private: Option<String>,
    pub public: Option<String>,
    pub purpose: Option<u32>,
    pub account: Option<u32>,
    pub index: Option<u32>,
}

impl std::fmt::Debug for KeyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("network", &self.network)
            .field("mode", &self.material().mode())
            .field("xpub", &self.xpub)
            .field("public", &self.public)
            .field("purpose", &self.purpose)
            .field("account", &self.account)
            .field("index", &self.index)
            .finish()
    }
}

impl KeyDescriptor {
    /// Descriptor for a raw private scalar
    pub fn private(hex: impl Into<String>) -> Self {
        Self {
            private: Some(hex.into()),
            ..Self::default()
        }
    }

    /// Descriptor for a public point only
    pub fn public(hex: impl Into<String>) -> Self {
        Self {
            public: Some(hex.into()),
            ..Self::default()
        }
    }

    /// Resolve the construction mode by priority
    pub fn material(&self) -> KeyMaterial {
        if let Some(seed) = &self.seed {
            KeyMaterial::SeedPhrase(Zeroizing::new(seed.clone()))
        } else if let Some(xprv) = &self.xprv {
            KeyMaterial::Xprv(Zeroizing::new(xprv.clone()))
        } else if let Some(xpub) = &self.xpub {
            KeyMaterial::Xpub(xpub.clone())
        } else if let Some(private) = &self.private {
            KeyMaterial::PrivateScalar(Zeroizing::new(private.clone()))
        } else if let Some(public) = &self.public {
            KeyMaterial::PublicPoint(public.clone())
        } else {
            KeyMaterial::Random
        }
    }

    /// Whether the resolved mode must yield a private scalar
    pub fn expects_private(&self) -> bool {
        matches!(
            self.material().mode(),
            KeyMode::SeedPhrase | KeyMode::Xprv | KeyMode::PrivateScalar | KeyMode::Random
        )
    }

    pub fn options(&self) -> KeyOptions {
        KeyOptions {
            network: self.network,
            purpose: self.purpose.unwrap_or(DEFAULT_PURPOSE),
            account: self.account.unwrap_or(0),
            index: self.index.unwrap_or(0),
        }
    }
}

enum MasterChain {
    Private(ExtendedPrivKey),
    Public(ExtendedPubKey),
}

/// A secp256k1 key pair with optional HD master chain
pub struct Key {
    mode: KeyMode,
    options: KeyOptions,
    master: Option<MasterChain>,
    secret: Option<SecretKey>,
    public: PublicKey,
    xprv: Option<Zeroizing<String>>,
    iv_stream: Mutex<IvStream>,
    secured: bool,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("mode", &self.mode)
            .field("network", &self.options.network)
            .field("public", &self.public)
            .field("has_private", &self.secret.is_some())
            .field("has_master", &self.master.is_some())
            .field("secured", &self.secured)
            .finish()
    }
}

impl Key {
    /// Build a key from a descriptor
    pub fn from_descriptor(descriptor: &KeyDescriptor) -> Result<Self> {
        Self::new(descriptor.material(), descriptor.options())
    }

    /// Build a key from resolved material
    #[instrument(skip(material), fields(mode = ?material.mode()))]
    pub fn new(material: KeyMaterial, options: KeyOptions) -> Result<Self> {
        let mode = material.mode();
        match material {
            KeyMaterial::SeedPhrase(phrase) => {
                let mnemonic = bip39::Mnemonic::parse_normalized(phrase.trim())
                    .map_err(|e| CoreError::InvalidSeedPhrase(e.to_string()))?;
                let mut seed = mnemonic.to_seed_normalized("");
                let master = ExtendedPrivKey::from_seed(&seed);
                seed.zeroize();
                Self::from_master(mode, MasterChain::Private(master?), options)
            }
            KeyMaterial::Xprv(encoded) => {
                let (master, decoded) = ExtendedPrivKey::decode(&encoded)?;
                let options = KeyOptions {
                    network: reconcile_network(decoded, options.network),
                    ..options
                };
                Self::from_master(mode, MasterChain::Private(master), options)
            }
            KeyMaterial::Xpub(encoded) => {
                let (master, decoded) = ExtendedPubKey::decode(&encoded)?;
                let options = KeyOptions {
                    network: reconcile_network(decoded, options.network),
                    ..options
                };
                Self::from_master(mode, MasterChain::Public(master), options)
            }
            KeyMaterial::PrivateScalar(hex_scalar) => {
                let bytes = Zeroizing::new(hex::decode(hex_scalar.trim())?);
                if bytes.len() != 32 {
                    return Err(CoreError::InvalidKeyMaterial(format!(
                        "private scalar must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                let secret = SecretKey::from_slice(&bytes)
                    .map_err(|e| CoreError::InvalidKeyMaterial(e.to_string()))?;
                Self::from_secret_key(mode, secret, options)
            }
            KeyMaterial::PublicPoint(hex_point) => {
                let public = PublicKey::from_hex(hex_point.trim())?;
                Ok(Self::assemble(mode, options, None, None, public, None))
            }
            KeyMaterial::Random => {
                Self::from_secret_key(mode, SecretKey::random(&mut OsRng), options)
            }
        }
    }

    /// Fresh random key
    pub fn random(network: Network) -> Result<Self> {
        Self::new(KeyMaterial::Random, KeyOptions::for_network(network))
    }

    /// Key from a BIP39 phrase
    pub fn from_seed_phrase(phrase: &str, options: KeyOptions) -> Result<Self> {
        Self::new(KeyMaterial::SeedPhrase(Zeroizing::new(phrase.to_string())), options)
    }

    /// Key from a hex private scalar
    pub fn from_private_hex(hex_scalar: &str, network: Network) -> Result<Self> {
        Self::new(
            KeyMaterial::PrivateScalar(Zeroizing::new(hex_scalar.to_string())),
            KeyOptions::for_network(network),
        )
    }

    /// Public-only key from a hex SEC1 point
    pub fn from_public_hex(hex_point: &str, network: Network) -> Result<Self> {
        Self::new(
            KeyMaterial::PublicPoint(hex_point.to_string()),
            KeyOptions::for_network(network),
        )
    }

    fn from_master(mode: KeyMode, master: MasterChain, options: KeyOptions) -> Result<Self> {
        let path = account_path(&master, &options, 0, options.index);
        let (secret, public, xprv) = match &master {
            MasterChain::Private(xprv) => {
                let child = xprv.derive(&path)?;
                let encoded = Zeroizing::new(xprv.encode(options.network));
                (Some(child.secret_key()?), child.public_key()?, Some(encoded))
            }
            MasterChain::Public(xpub) => {
                let child = xpub.derive(&path)?;
                (None, *child.public_key(), None)
            }
        };
        debug!(path = %path, "Restored key from master chain");
        Ok(Self::assemble(mode, options, Some(master), secret, public, xprv))
    }

    fn from_secret_key(mode: KeyMode, secret: SecretKey, options: KeyOptions) -> Result<Self> {
        let public = PublicKey::from_k256(&secret.public_key())?;
        Ok(Self::assemble(mode, options, None, Some(secret), public, None))
    }

    fn assemble(
        mode: KeyMode,
        options: KeyOptions,
        master: Option<MasterChain>,
        secret: Option<SecretKey>,
        public: PublicKey,
        xprv: Option<Zeroizing<String>>,
    ) -> Self {
        let iv_stream = match &secret {
            Some(secret) => IvStream::new(&secret.to_bytes()),
            None => IvStream::new(public.as_bytes()),
        };
        Self {
            mode,
            options,
            master,
            secret,
            public,
            xprv,
            iv_stream: Mutex::new(iv_stream),
            secured: false,
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    pub fn options(&self) -> &KeyOptions {
        &self.options
    }

    pub fn network(&self) -> Network {
        self.options.network
    }

    /// Compressed public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// x-only public key used for Schnorr
    pub fn x_only(&self) -> [u8; 32] {
        self.public.x_only()
    }

    /// Identifier of this key: digest of the compressed public key
    pub fn id(&self) -> Digest {
        Digest::hash(self.public.as_bytes())
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    pub fn is_secured(&self) -> bool {
        self.secured
    }

    fn secret(&self) -> Result<&SecretKey> {
        match &self.secret {
            Some(secret) => Ok(secret),
            None if self.secured => Err(CoreError::KeySecured),
            None => Err(CoreError::MissingPrivateKey),
        }
    }

    fn master(&self) -> Result<&MasterChain> {
        match &self.master {
            Some(master) => Ok(master),
            None if self.secured => Err(CoreError::KeySecured),
            None => Err(CoreError::MissingMasterKey),
        }
    }

    /// Private scalar as hex
    pub fn private_key_hex(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(hex::encode(self.secret()?.to_bytes())))
    }

    /// Serialized master extended private key
    pub fn xprv(&self) -> Result<String> {
        match (self.master()?, &self.xprv) {
            (MasterChain::Private(_), Some(xprv)) => Ok(xprv.to_string()),
            _ => Err(CoreError::MissingPrivateKey),
        }
    }

    /// Serialized master extended public key
    pub fn xpub(&self) -> Result<String> {
        match self.master()? {
            MasterChain::Private(xprv) => Ok(xprv.to_extended_public()?.encode(self.options.network)),
            MasterChain::Public(xpub) => Ok(xpub.encode(self.options.network)),
        }
    }

    /// Derive a child key along `path` from the master chain.
    ///
    /// Returns a new key; `self` is untouched. The child carries no master
    /// chain of its own.
    #[instrument(skip_all, fields(path = %path))]
    pub fn derive_child(&self, path: &DerivationPath) -> Result<Key> {
        let child = match self.master()? {
            MasterChain::Private(xprv) => {
                let derived = xprv.derive(path)?;
                Self::from_secret_key(KeyMode::PrivateScalar, derived.secret_key()?, self.options)?
            }
            MasterChain::Public(xpub) => {
                let derived = xpub.derive(path)?;
                Self::assemble(
                    KeyMode::PublicPoint,
                    self.options,
                    None,
                    None,
                    *derived.public_key(),
                    None,
                )
            }
        };
        debug!(public = %child.public, "Derived child key");
        Ok(child)
    }

    /// Derive a child from a textual path such as `m/44'/0'/0'/0/1`
    pub fn derive_path(&self, path: &str) -> Result<Key> {
        self.derive_child(&path.parse::<DerivationPath>()?)
    }

    /// Path of the `change/index` child under the configured account
    pub fn address_path(&self, change: u32, index: u32) -> Result<DerivationPath> {
        Ok(account_path(self.master()?, &self.options, change, index))
    }

    /// Derive the child at `change/index` and encode its address
    pub fn derive_address(&self, index: u32, change: u32, kind: AddressKind) -> Result<DerivedAddress> {
        let path = self.address_path(change, index)?;
        let child = self.derive_child(&path)?;
        let address = address::encode_address(&child.public, kind, self.options.network)?;
        let private_key = child.private_key_hex().ok().map(|scalar| scalar.to_string());

        Ok(DerivedAddress {
            address,
            kind,
            path: path.to_string_path(),
            public_key: child.public,
            private_key,
        })
    }

    /// Address of this key itself
    pub fn address(&self, kind: AddressKind) -> Result<String> {
        address::encode_address(&self.public, kind, self.options.network)
    }

    /// BIP340 Schnorr signature over `Digest(message)`
    pub fn sign_schnorr(&self, message: impl AsRef<[u8]>) -> Result<SchnorrSignature> {
        let secret = self.secret()?;
        let signing_key = schnorr::SigningKey::from_bytes(&secret.to_bytes())
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let hash = Digest::hash(message);
        let mut aux = [0u8; 32];
        OsRng.fill_bytes(&mut aux);
        let signature = signing_key
            .sign_raw(hash.as_bytes(), &aux)
            .map_err(|e| CoreError::Crypto(format!("Schnorr signing failed: {}", e)))?;

        Ok(SchnorrSignature::new(signature.to_bytes()))
    }

    /// Check a Schnorr signature; malformed input is simply `false`
    pub fn verify_schnorr(&self, message: impl AsRef<[u8]>, signature: &[u8]) -> bool {
        verify_schnorr_x_only(&self.x_only(), message.as_ref(), signature).unwrap_or(false)
    }

    /// DER-encoded ECDSA signature over `Digest(message)`
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let secret = self.secret()?;
        let signing_key = k256::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let hash = Digest::hash(message);
        let signature: k256::ecdsa::Signature = signing_key
            .sign_prehash(hash.as_bytes())
            .map_err(|e| CoreError::Crypto(format!("ECDSA signing failed: {}", e)))?;

        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Check a DER ECDSA signature; malformed input is simply `false`
    pub fn verify(&self, message: impl AsRef<[u8]>, signature: &[u8]) -> bool {
        let Ok(verifying_key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(self.public.as_bytes())
        else {
            return false;
        };
        let Ok(signature) = k256::ecdsa::Signature::from_der(signature) else {
            return false;
        };
        let hash = Digest::hash(message);
        verifying_key
            .verify_prehash(hash.as_bytes(), &signature)
            .is_ok()
    }

    /// Encrypt to `ivHex:cipherHex` under `Digest(private_scalar_hex)`.
    ///
    /// Public-only keys encrypt for the holder of the private scalar with an
    /// ephemeral ECDH share: `ephemeralPubHex:ivHex:cipherHex`.
    ///
    /// The IV stream is a pure function of the key, so nonces are unique
    /// only within one `Key` value. Two keys built from the same scalar,
    /// including in separate processes, restart the same sequence and reuse
    /// (key, nonce) pairs. Encrypt through one long-lived `Arc<Key>`.
    pub fn encrypt(&self, plaintext: impl AsRef<[u8]>) -> Result<String> {
        let iv = self.next_iv()?;
        match &self.secret {
            Some(_) => {
                let key = self.symmetric_key()?;
                cipher::seal(&key, &iv, plaintext.as_ref())
            }
            None => {
                let ephemeral = SecretKey::random(&mut OsRng);
                let shared = shared_key(&ephemeral, &self.public)?;
                let ephemeral_public = PublicKey::from_k256(&ephemeral.public_key())?;
                let sealed = cipher::seal(&shared, &iv, plaintext.as_ref())?;
                Ok(format!("{}:{}", ephemeral_public.to_hex(), sealed))
            }
        }
    }

    /// Decrypt either ciphertext form produced by [`Key::encrypt`]
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>> {
        let secret = self.secret()?;
        let parts: Vec<&str> = ciphertext.trim().split(':').collect();
        match parts.as_slice() {
            [iv_hex, cipher_hex] => {
                let key = self.symmetric_key()?;
                cipher::open_parts(&key, iv_hex, cipher_hex)
            }
            [ephemeral_hex, iv_hex, cipher_hex] => {
                let ephemeral = PublicKey::from_hex(ephemeral_hex).map_err(|e| {
                    CoreError::InvalidCiphertext(format!("bad ephemeral key: {}", e))
                })?;
                let shared = shared_key(secret, &ephemeral)?;
                cipher::open_parts(&shared, iv_hex, cipher_hex)
            }
            _ => Err(CoreError::InvalidCiphertext(
                "expected ivHex:cipherHex".to_string(),
            )),
        }
    }

    fn symmetric_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        let private_hex = self.private_key_hex()?;
        Ok(Zeroizing::new(Digest::hash(private_hex.as_bytes()).0))
    }

    fn next_iv(&self) -> Result<[u8; cipher::NONCE_SIZE]> {
        let mut stream = self
            .iv_stream
            .lock()
            .map_err(|_| CoreError::Crypto("IV stream lock poisoned".to_string()))?;
        Ok(stream.next_iv())
    }

    /// Deterministic one-off key bound to this key's scalar and `context`
    pub fn derive_ephemeral(&self, context: &[u8]) -> Result<Key> {
        let secret = self.secret()?;
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        for counter in 0u32..8 {
            let mut candidate = tagged_hash(
                "loom/ephemeral",
                &[secret_bytes.as_slice(), context, &counter.to_be_bytes()[..]],
            );
            let parsed = SecretKey::from_slice(&candidate);
            candidate.zeroize();
            if let Ok(derived) = parsed {
                return Self::from_secret_key(KeyMode::PrivateScalar, derived, self.options);
            }
        }
        Err(CoreError::Crypto(
            "could not derive ephemeral scalar".to_string(),
        ))
    }

    /// Irreversibly erase private scalar, xprv string and master chain.
    ///
    /// Public material stays usable; signing, decrypting and deriving fail
    /// with [`CoreError::KeySecured`] afterwards.
    pub fn secure(&mut self) {
        self.secret = None;
        self.master = None;
        self.xprv = None;
        self.iv_stream = Mutex::new(IvStream::new(self.public.as_bytes()));
        self.secured = true;
        debug!(public = %self.public, "Key secured");
    }
}

/// Verify a Schnorr signature against an x-only key.
///
/// `Err` means the key itself is unusable (the check could not be
/// evaluated); `Ok(false)` means the signature does not validate.
pub fn verify_schnorr_x_only(x_only: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<bool> {
    let verifying_key = schnorr::VerifyingKey::from_bytes(x_only)
        .map_err(|e| CoreError::InvalidKeyMaterial(format!("Invalid x-only key: {}", e)))?;
    let Ok(signature) = schnorr::Signature::try_from(signature) else {
        return Ok(false);
    };
    let hash = Digest::hash(message);
    Ok(verifying_key.verify_raw(hash.as_bytes(), &signature).is_ok())
}

fn shared_key(secret: &SecretKey, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>> {
    let scalar: Scalar = *secret.to_nonzero_scalar();
    let point = (ProjectivePoint::from(*peer.to_k256()?.as_affine()) * scalar).to_affine();
    let encoded = point.to_encoded_point(true);
    let x = encoded
        .x()
        .ok_or_else(|| CoreError::Crypto("shared point at infinity".to_string()))?;
    let x_hex = Zeroizing::new(hex::encode(x));
    Ok(Zeroizing::new(Digest::hash(x_hex.as_bytes()).0))
}

fn account_path(master: &MasterChain, options: &KeyOptions, change: u32, index: u32) -> DerivationPath {
    match master {
        MasterChain::Private(xprv) if xprv.depth() == 0 => DerivationPath::bip44(
            options.purpose,
            options.network.coin_type(),
            options.account,
            change,
            index,
        ),
        // Restored account-level keys, and every public chain
        _ => DerivationPath::relative(change, index),
    }
}

fn reconcile_network(decoded: Network, configured: Network) -> Network {
    match (decoded, configured) {
        (Network::Mainnet, _) => Network::Mainnet,
        (_, Network::Regtest) => Network::Regtest,
        _ => Network::Testnet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn seeded(network: Network) -> Key {
        Key::from_seed_phrase(PHRASE, KeyOptions::for_network(network)).unwrap()
    }

    #[test]
    fn test_descriptor_priority() {
        let descriptor = KeyDescriptor {
            seed: Some(PHRASE.to_string()),
            private: Some("01".repeat(32)),
            public: Some("02".repeat(33)),
            ..KeyDescriptor::default()
        };
        assert_eq!(descriptor.material().mode(), KeyMode::SeedPhrase);

        let descriptor = KeyDescriptor {
            private: Some("01".repeat(32)),
            public: Some("02".repeat(33)),
            ..KeyDescriptor::default()
        };
        assert_eq!(descriptor.material().mode(), KeyMode::PrivateScalar);
        assert_eq!(KeyDescriptor::default().material().mode(), KeyMode::Random);
    }

    #[test]
    fn test_seed_phrase_bip44_vector() {
        // m/44'/0'/0'/0/0 for the all-"abandon" mnemonic
        let key = seeded(Network::Mainnet);
        let derived = key.derive_address(0, 0, AddressKind::Legacy).unwrap();
        assert_eq!(derived.address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        assert_eq!(derived.path, "m/44'/0'/0'/0/0");
        assert!(derived.private_key.is_some());
    }

    #[test]
    fn test_address_is_deterministic() {
        let a = seeded(Network::Mainnet)
            .derive_address(0, 0, AddressKind::Legacy)
            .unwrap();
        let b = seeded(Network::Mainnet)
            .derive_address(0, 0, AddressKind::Legacy)
            .unwrap();
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn test_invalid_seed_phrase() {
        let err = Key::from_seed_phrase("not a real mnemonic", KeyOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSeedPhrase(_)));
    }

    #[test]
    fn test_derive_without_master_fails() {
        let key = Key::random(Network::Mainnet).unwrap();
        let err = key.derive_path("m/0").unwrap_err();
        assert!(matches!(err, CoreError::MissingMasterKey));
        assert_eq!(err.to_string(), "Cannot derive without a master key");
    }

    #[test]
    fn test_derive_child_returns_new_key() {
        let key = seeded(Network::Mainnet);
        let before = *key.public_key();
        let child = key.derive_path("m/44'/0'/0'/0/5").unwrap();
        assert_eq!(key.public_key(), &before);
        assert_ne!(child.public_key(), &before);
        assert!(!child.has_master());
    }

    #[test]
    fn test_xpub_restoration_derives_public_children() {
        let key = seeded(Network::Testnet);
        let account = key.derive_path("m/44'/1'/0'").unwrap();
        assert!(account.has_private());

        let xprv = key.xprv().unwrap();
        assert!(xprv.starts_with("tprv"));

        let xpub = key.xpub().unwrap();
        let watch = Key::from_descriptor(&KeyDescriptor {
            xpub: Some(xpub),
            network: Network::Testnet,
            ..KeyDescriptor::default()
        })
        .unwrap();
        assert_eq!(watch.mode(), KeyMode::Xpub);
        assert!(!watch.has_private());

        let err = watch.derive_path("m/0'").unwrap_err();
        assert!(matches!(err, CoreError::HardenedFromPublic(_)));

        let watched = watch.derive_address(0, 0, AddressKind::SegwitV0).unwrap();
        assert!(watched.private_key.is_none());
        assert!(watched.address.starts_with("tb1q"));
    }

    #[test]
    fn test_xprv_restoration_matches_seed() {
        let key = seeded(Network::Mainnet);
        let restored = Key::from_descriptor(&KeyDescriptor {
            xprv: Some(key.xprv().unwrap()),
            ..KeyDescriptor::default()
        })
        .unwrap();
        assert_eq!(restored.public_key(), key.public_key());
        assert_eq!(
            restored.derive_address(3, 1, AddressKind::SegwitV1).unwrap().address,
            key.derive_address(3, 1, AddressKind::SegwitV1).unwrap().address
        );
    }

    #[test]
    fn test_public_only_capabilities() {
        let owner = Key::random(Network::Mainnet).unwrap();
        let public = Key::from_public_hex(&owner.public_key().to_hex(), Network::Mainnet).unwrap();

        assert!(!public.has_private());
        assert!(matches!(public.sign(b"m"), Err(CoreError::MissingPrivateKey)));
        assert!(matches!(public.sign_schnorr(b"m"), Err(CoreError::MissingPrivateKey)));
        assert!(matches!(public.decrypt("00:00"), Err(CoreError::MissingPrivateKey)));

        let signature = owner.sign(b"m").unwrap();
        assert!(public.verify(b"m", &signature));

        let sealed = public.encrypt(b"for the owner").unwrap();
        assert_eq!(owner.decrypt(&sealed).unwrap(), b"for the owner");
    }

    #[test]
    fn test_schnorr_roundtrip() {
        let key = Key::random(Network::Mainnet).unwrap();
        let signature = key.sign_schnorr(b"hello").unwrap();
        assert_eq!(signature.as_bytes().len(), 64);
        assert!(key.verify_schnorr(b"hello", signature.as_bytes()));
        assert!(!key.verify_schnorr(b"hellp", signature.as_bytes()));
        assert!(!key.verify_schnorr(b"hello", &signature.as_bytes()[..63]));
    }

    #[test]
    fn test_ecdsa_roundtrip() {
        let key = Key::random(Network::Mainnet).unwrap();
        let der = key.sign(b"hello").unwrap();
        assert_eq!(der[0], 0x30);
        assert!(key.verify(b"hello", &der));
        assert!(!key.verify(b"goodbye", &der));
        assert!(!key.verify(b"hello", b"not der"));
    }

    #[test]
    fn test_encrypt_advances_iv_stream() {
        let key = Key::from_private_hex(&"11".repeat(32), Network::Mainnet).unwrap();
        let twin = Key::from_private_hex(&"11".repeat(32), Network::Mainnet).unwrap();

        let first = key.encrypt(b"same").unwrap();
        let second = key.encrypt(b"same").unwrap();
        assert_ne!(first, second);
        assert_eq!(first, twin.encrypt(b"same").unwrap());

        assert_eq!(key.decrypt(&first).unwrap(), b"same");
        assert_eq!(key.decrypt(&second).unwrap(), b"same");
    }

    #[test]
    fn test_shared_key_never_repeats_iv() {
        let key = Key::from_private_hex(&"12".repeat(32), Network::Mainnet).unwrap();
        let key = std::sync::Arc::new(key);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let key = std::sync::Arc::clone(&key);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| {
                            let sealed = key.encrypt(b"x").unwrap();
                            sealed.split_once(':').unwrap().0.to_string()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ivs: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique: std::collections::HashSet<&String> = ivs.iter().collect();
        assert_eq!(unique.len(), ivs.len());
    }

    #[test]
    fn test_decrypt_failures_are_reported() {
        let key = Key::random(Network::Mainnet).unwrap();
        let other = Key::random(Network::Mainnet).unwrap();
        let sealed = key.encrypt(b"data").unwrap();

        assert!(matches!(other.decrypt(&sealed), Err(CoreError::InvalidCiphertext(_))));
        assert!(matches!(key.decrypt("garbage"), Err(CoreError::InvalidCiphertext(_))));
        assert!(matches!(key.decrypt("a:b:c:d"), Err(CoreError::InvalidCiphertext(_))));
    }

    #[test]
    fn test_secure_erases_private_material() {
        let mut key = seeded(Network::Mainnet);
        let public = *key.public_key();
        let signature = key.sign_schnorr(b"before").unwrap();

        key.secure();

        assert!(key.is_secured());
        assert!(!key.has_private());
        assert!(matches!(key.sign_schnorr(b"after"), Err(CoreError::KeySecured)));
        assert!(matches!(key.decrypt("00:00"), Err(CoreError::KeySecured)));
        assert!(matches!(key.derive_path("m/0"), Err(CoreError::KeySecured)));
        assert!(key.xprv().is_err());

        assert_eq!(key.public_key(), &public);
        assert!(key.verify_schnorr(b"before", signature.as_bytes()));
        assert!(key.encrypt(b"still works").is_ok());
    }

    #[test]
    fn test_ephemeral_is_deterministic() {
        let key = Key::from_private_hex(&"22".repeat(32), Network::Mainnet).unwrap();
        let a = key.derive_ephemeral(b"ctx").unwrap();
        let b = key.derive_ephemeral(b"ctx").unwrap();
        let c = key.derive_ephemeral(b"other").unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
        assert_ne!(a.public_key(), key.public_key());
    }

    #[test]
    fn test_capability_errors_are_flagged() {
        assert!(CoreError::MissingPrivateKey.is_capability_error());
        assert!(CoreError::KeySecured.is_capability_error());
        assert!(!CoreError::InvalidCiphertext("x".into()).is_capability_error());
    }
}
