//! Tapscript construction for federation addresses (BIP341/BIP342)
//!
//! Leaves are hashed with the `TapLeaf` tag at leaf version 0xc0, inner
//! nodes with `TapBranch` over the lexicographically sorted children, and
//! the output key is `P + TapTweak(P || root)·G`.

use loom_core::digest::tagged_hash;
use loom_core::key::address::tweak_x_only;

use crate::error::{FederationError, Result};

/// Tapscript leaf version
pub const LEAF_VERSION: u8 = 0xc0;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHBYTES_32: u8 = 0x20;
pub const OP_1: u8 = 0x51;
pub const OP_DROP: u8 = 0x75;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
pub const OP_CHECKSIGADD: u8 = 0xba;

/// Largest relative lock-time expressible in blocks (BIP68)
pub const MAX_CSV_BLOCKS: u32 = 0xffff;

/// Append a minimally encoded script number
pub fn push_number(script: &mut Vec<u8>, n: u32) {
    match n {
        0 => script.push(OP_0),
        1..=16 => script.push(OP_1 + (n as u8 - 1)),
        _ => {
            let mut bytes = n.to_le_bytes().to_vec();
            while bytes.last() == Some(&0) {
                bytes.pop();
            }
            // Script numbers are signed; keep the top bit clear
            if bytes.last().is_some_and(|b| b & 0x80 != 0) {
                bytes.push(0);
            }
            script.push(bytes.len() as u8);
            script.extend_from_slice(&bytes);
        }
    }
}

/// `<k1> CHECKSIG <k2> CHECKSIGADD ... <kn> CHECKSIGADD <m> NUMEQUAL`
pub fn multisig_script(keys: &[[u8; 32]], threshold: usize) -> Result<Vec<u8>> {
    if threshold == 0 || threshold > keys.len() {
        return Err(FederationError::InvalidThreshold {
            threshold,
            members: keys.len(),
        });
    }
    let threshold = u32::try_from(threshold)
        .map_err(|_| FederationError::InvalidScript("threshold too large".to_string()))?;

    let mut script = Vec::with_capacity(keys.len() * 34 + 4);
    for (i, key) in keys.iter().enumerate() {
        script.push(OP_PUSHBYTES_32);
        script.extend_from_slice(key);
        script.push(if i == 0 { OP_CHECKSIG } else { OP_CHECKSIGADD });
    }
    push_number(&mut script, threshold);
    script.push(OP_NUMEQUAL);
    Ok(script)
}

/// `<blocks> CSV DROP <key> CHECKSIG`
pub fn timeout_script(blocks: u32, key: &[u8; 32]) -> Result<Vec<u8>> {
    if blocks == 0 || blocks > MAX_CSV_BLOCKS {
        return Err(FederationError::InvalidScript(format!(
            "timeout must be 1..={} blocks, got {}",
            MAX_CSV_BLOCKS, blocks
        )));
    }
    let mut script = Vec::with_capacity(40);
    push_number(&mut script, blocks);
    script.push(OP_CHECKSEQUENCEVERIFY);
    script.push(OP_DROP);
    script.push(OP_PUSHBYTES_32);
    script.extend_from_slice(key);
    script.push(OP_CHECKSIG);
    Ok(script)
}

/// TapLeaf hash of a script at [`LEAF_VERSION`]
pub fn leaf_hash(script: &[u8]) -> [u8; 32] {
    tagged_hash(
        "TapLeaf",
        &[&[LEAF_VERSION], &compact_size(script.len()), script],
    )
}

/// TapBranch hash of two children, sorted
pub fn branch_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    if a <= b {
        tagged_hash("TapBranch", &[a, b])
    } else {
        tagged_hash("TapBranch", &[b, a])
    }
}

/// Root over leaf hashes, pairing neighbours level by level.
///
/// A trailing odd node is carried up unchanged.
pub fn tree_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => branch_hash(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level.first().copied()
}

/// Tweak an internal x-only key with an optional script tree root
pub fn output_key(internal: &[u8; 32], merkle_root: Option<&[u8; 32]>) -> Result<[u8; 32]> {
    let tweak = match merkle_root {
        Some(root) => tagged_hash("TapTweak", &[internal, root]),
        None => tagged_hash("TapTweak", &[internal]),
    };
    Ok(tweak_x_only(internal, &tweak)?)
}

fn compact_size(len: usize) -> Vec<u8> {
    match len {
        0..=0xfc => vec![len as u8],
        0xfd..=0xffff => {
            let mut out = vec![0xfd];
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out
        }
        _ => {
            let mut out = vec![0xfe];
            out.extend_from_slice(&(len as u32).to_le_bytes());
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(hex_str: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut out).unwrap();
        out
    }

    #[test]
    fn test_key_path_only_output_key() {
        // BIP341 wallet test vector: key path spend, no scripts
        let internal = x("d6889cb081036e0faefa3a35157ad71086b123b2b144b649798b494c300a961d");
        assert_eq!(
            hex::encode(output_key(&internal, None).unwrap()),
            "53a1f6e454df1aa2776a2814a721372d6258050de330b3c6d10ee8f4e0dda343"
        );
    }

    #[test]
    fn test_push_number_minimal() {
        let mut s = Vec::new();
        push_number(&mut s, 3);
        assert_eq!(s, vec![0x53]);

        let mut s = Vec::new();
        push_number(&mut s, 144);
        assert_eq!(s, vec![0x02, 0x90, 0x00]);

        let mut s = Vec::new();
        push_number(&mut s, 17);
        assert_eq!(s, vec![0x01, 0x11]);
    }

    #[test]
    fn test_multisig_script_layout() {
        let keys = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let script = multisig_script(&keys, 2).unwrap();
        assert_eq!(script.len(), 3 * 34 + 2);
        assert_eq!(script[33], OP_CHECKSIG);
        assert_eq!(script[67], OP_CHECKSIGADD);
        assert_eq!(script[101], OP_CHECKSIGADD);
        assert_eq!(&script[102..], &[0x52, OP_NUMEQUAL]);

        assert!(multisig_script(&keys, 0).is_err());
        assert!(multisig_script(&keys, 4).is_err());
    }

    #[test]
    fn test_timeout_script_bounds() {
        assert!(timeout_script(0, &[1u8; 32]).is_err());
        assert!(timeout_script(MAX_CSV_BLOCKS + 1, &[1u8; 32]).is_err());
        let script = timeout_script(144, &[1u8; 32]).unwrap();
        assert_eq!(&script[3..5], &[OP_CHECKSEQUENCEVERIFY, OP_DROP]);
        assert_eq!(*script.last().unwrap(), OP_CHECKSIG);
    }

    #[test]
    fn test_branch_is_order_independent() {
        let a = leaf_hash(b"a");
        let b = leaf_hash(b"b");
        assert_eq!(branch_hash(&a, &b), branch_hash(&b, &a));
    }

    #[test]
    fn test_tree_root_shapes() {
        assert_eq!(tree_root(&[]), None);
        let a = leaf_hash(b"a");
        let b = leaf_hash(b"b");
        let c = leaf_hash(b"c");
        assert_eq!(tree_root(&[a]), Some(a));
        assert_eq!(
            tree_root(&[a, b, c]),
            Some(branch_hash(&branch_hash(&a, &b), &c))
        );
    }
}
