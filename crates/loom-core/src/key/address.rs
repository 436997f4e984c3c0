//! Bitcoin-style address encodings: base58 P2PKH, bech32 v0, bech32m v1

use k256::ProjectivePoint;
use ripemd::{Digest as _, Ripemd160};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::hd::parse_scalar;
use crate::digest::{sha256, sha256_multi};
use crate::error::{CoreError, Result};
use crate::types::{Network, PublicKey};

/// Output type to encode a derived key as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// Base58 pay-to-pubkey-hash
    #[serde(rename = "legacy")]
    Legacy,
    /// Bech32 witness v0 pubkey hash
    #[serde(rename = "segwit-v0")]
    SegwitV0,
    /// Bech32m witness v1 (taproot) output key
    #[serde(rename = "segwit-v1")]
    SegwitV1,
}

impl std::str::FromStr for AddressKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" | "p2pkh" => Ok(AddressKind::Legacy),
            "segwit-v0" | "segwit" | "p2wpkh" => Ok(AddressKind::SegwitV0),
            "segwit-v1" | "taproot" | "p2tr" => Ok(AddressKind::SegwitV1),
            other => Err(CoreError::Address(format!("unknown address kind: {}", other))),
        }
    }
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AddressKind::Legacy => "legacy",
            AddressKind::SegwitV0 => "segwit-v0",
            AddressKind::SegwitV1 => "segwit-v1",
        })
    }
}

/// Address of a derived child key together with its key pair
#[derive(Clone, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub address: String,
    pub kind: AddressKind,
    pub path: String,
    pub public_key: PublicKey,
    /// Hex private scalar, absent when derived from public material
    pub private_key: Option<String>,
}

impl std::fmt::Debug for DerivedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAddress")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Drop for DerivedAddress {
    fn drop(&mut self) {
        if let Some(private_key) = self.private_key.as_mut() {
            private_key.zeroize();
        }
    }
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(sha256(data)));
    out
}

/// Encode a public key as an address of the given kind
pub fn encode_address(public_key: &PublicKey, kind: AddressKind, network: Network) -> Result<String> {
    match kind {
        AddressKind::Legacy => Ok(p2pkh(public_key, network)),
        AddressKind::SegwitV0 => p2wpkh(public_key, network),
        AddressKind::SegwitV1 => {
            let output_key = taproot_output_key(&public_key.x_only())?;
            p2tr(&output_key, network)
        }
    }
}

/// Base58check pay-to-pubkey-hash
pub fn p2pkh(public_key: &PublicKey, network: Network) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(network.p2pkh_version());
    payload.extend_from_slice(&hash160(public_key.as_bytes()));
    bs58::encode(payload).with_check().into_string()
}

/// Bech32 witness v0 over HASH160 of the compressed key
pub fn p2wpkh(public_key: &PublicKey, network: Network) -> Result<String> {
    let program = hash160(public_key.as_bytes());
    bech32::segwit::encode(network.hrp(), bech32::segwit::VERSION_0, &program)
        .map_err(|e| CoreError::Address(e.to_string()))
}

/// Bech32m witness v1 over a 32-byte x-only output key
pub fn p2tr(output_key: &[u8; 32], network: Network) -> Result<String> {
    bech32::segwit::encode(network.hrp(), bech32::segwit::VERSION_1, output_key)
        .map_err(|e| CoreError::Address(e.to_string()))
}

/// Single-key taproot output: `tweak = SHA256(P || 0^32)`, `Q = P + tweak*G`
pub fn taproot_output_key(x_only: &[u8; 32]) -> Result<[u8; 32]> {
    let tweak = sha256_multi(&[x_only, &[0u8; 32]]);
    tweak_x_only(x_only, &tweak)
}

/// Lift an x-only key to its even-Y point and add `tweak*G`, returning x(Q)
pub fn tweak_x_only(x_only: &[u8; 32], tweak: &[u8; 32]) -> Result<[u8; 32]> {
    let internal = lift_x(x_only)?;
    let t = parse_scalar(tweak)?;
    let tweaked = ProjectivePoint::from(*internal.as_affine()) + ProjectivePoint::GENERATOR * t;
    let tweaked = k256::PublicKey::from_affine(tweaked.to_affine())
        .map_err(|_| CoreError::Crypto("tweaked key is the point at infinity".to_string()))?;
    Ok(PublicKey::from_k256(&tweaked)?.x_only())
}

/// Even-Y point with the given x coordinate
pub fn lift_x(x_only: &[u8; 32]) -> Result<k256::PublicKey> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(x_only);
    k256::PublicKey::from_sec1_bytes(&compressed)
        .map_err(|_| CoreError::InvalidKeyMaterial("x coordinate is not on the curve".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Public key of private scalar 1 (the generator)
    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn generator() -> PublicKey {
        PublicKey::from_hex(G).unwrap()
    }

    #[test]
    fn test_hash160_of_generator() {
        assert_eq!(
            hex::encode(hash160(generator().as_bytes())),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_legacy_address_vector() {
        assert_eq!(
            p2pkh(&generator(), Network::Mainnet),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
        assert!(p2pkh(&generator(), Network::Testnet).starts_with(['m', 'n']));
    }

    #[test]
    fn test_segwit_v0_vector() {
        assert_eq!(
            p2wpkh(&generator(), Network::Mainnet).unwrap(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
        assert!(p2wpkh(&generator(), Network::Regtest)
            .unwrap()
            .starts_with("bcrt1q"));
    }

    #[test]
    fn test_segwit_v1_shape() {
        for (network, prefix) in [
            (Network::Mainnet, "bc1p"),
            (Network::Testnet, "tb1p"),
            (Network::Regtest, "bcrt1p"),
        ] {
            let address = encode_address(&generator(), AddressKind::SegwitV1, network).unwrap();
            assert!(address.starts_with(prefix), "{}", address);
            assert!((62..=90).contains(&address.len()));
        }
    }

    #[test]
    fn test_tweak_changes_key() {
        let x = generator().x_only();
        let output = taproot_output_key(&x).unwrap();
        assert_ne!(output, x);
        assert_eq!(output, taproot_output_key(&x).unwrap());
    }

    #[test]
    fn test_lift_x_rejects_non_point() {
        // BIP340 test vector 5: public key not on the curve
        let mut x = [0u8; 32];
        hex::decode_to_slice(
            "eefdea4cdb677750a420fee807eacf21eb9898ae79b9768766e4faa04a2d4a34",
            &mut x,
        )
        .unwrap();
        assert!(lift_x(&x).is_err());
    }

    #[test]
    fn test_address_kind_parse() {
        assert_eq!("taproot".parse::<AddressKind>().unwrap(), AddressKind::SegwitV1);
        assert_eq!("segwit-v0".parse::<AddressKind>().unwrap(), AddressKind::SegwitV0);
        assert!("p2sh".parse::<AddressKind>().is_err());
    }
}
