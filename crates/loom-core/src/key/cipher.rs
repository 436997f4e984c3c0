//! Symmetric encryption for key holders.
//!
//! Ciphertext is ChaCha20-Poly1305 in the text format `ivHex:cipherHex`.
//! Nonces come from a per-key ChaCha20 stream seeded from the key itself,
//! so one key walks a reproducible nonce sequence. Keys sharing a stream
//! must never draw from it concurrently; callers hold the stream behind a
//! mutex.
//!
//! Encrypting for a public-only key uses an ephemeral ECDH share and the
//! three-part form `ephemeralPubHex:ivHex:cipherHex`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::Zeroize;

use crate::digest::sha256_multi;
use crate::error::{CoreError, Result};

/// Size of the nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the symmetric key in bytes
pub const KEY_SIZE: usize = 32;

const IV_STREAM_DOMAIN: &[u8] = b"loom/iv-stream";

/// Deterministic nonce source owned by one key
pub struct IvStream {
    rng: ChaCha20Rng,
}

impl IvStream {
    /// Seed the stream from key material
    pub fn new(seed_material: &[u8]) -> Self {
        let mut seed = sha256_multi(&[IV_STREAM_DOMAIN, seed_material]);
        let rng = ChaCha20Rng::from_seed(seed);
        seed.zeroize();
        Self { rng }
    }

    /// Draw the next nonce
    pub fn next_iv(&mut self) -> [u8; NONCE_SIZE] {
        let mut iv = [0u8; NONCE_SIZE];
        self.rng.fill_bytes(&mut iv);
        iv
    }
}

impl std::fmt::Debug for IvStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvStream")
            .field("word_pos", &self.rng.get_word_pos())
            .finish()
    }
}

/// Encrypt with an explicit key and nonce, returning `ivHex:cipherHex`
pub fn seal(key: &[u8; KEY_SIZE], iv: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<String> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| CoreError::Crypto(format!("Encryption failed: {}", e)))?;
    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypt `ivHex:cipherHex`
pub fn open(key: &[u8; KEY_SIZE], encoded: &str) -> Result<Vec<u8>> {
    let (iv_hex, cipher_hex) = encoded
        .split_once(':')
        .ok_or_else(|| CoreError::InvalidCiphertext("expected ivHex:cipherHex".to_string()))?;
    open_parts(key, iv_hex, cipher_hex)
}

pub(crate) fn open_parts(key: &[u8; KEY_SIZE], iv_hex: &str, cipher_hex: &str) -> Result<Vec<u8>> {
    let mut iv = [0u8; NONCE_SIZE];
    hex::decode_to_slice(iv_hex, &mut iv)
        .map_err(|e| CoreError::InvalidCiphertext(format!("bad iv: {}", e)))?;
    let ciphertext = hex::decode(cipher_hex)
        .map_err(|e| CoreError::InvalidCiphertext(format!("bad ciphertext: {}", e)))?;

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CoreError::InvalidCiphertext("authentication failed".to_string()))
}
