//! Property tests for multi-signature thresholds

use loom_core::{KeyDescriptor, Network};
use loom_federation::Federation;
use proptest::prelude::*;

fn federation(members: u8) -> Federation {
    let descriptors: Vec<KeyDescriptor> = (1..=members)
        .map(|n| KeyDescriptor::private(hex::encode([n; 32])))
        .collect();
    Federation::from_descriptors(Network::Testnet, &descriptors).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn satisfied_exactly_up_to_member_count(members in 1u8..6, message in "[a-z]{0,16}") {
        let fed = federation(members);
        let multisig = fed.create_multi_signature(message.as_str()).unwrap();
        for threshold in 1..=(members as usize + 1) {
            let report = fed.verify_multi_signature(&multisig, threshold).unwrap();
            prop_assert_eq!(report.is_satisfied(), threshold <= members as usize);
        }
    }

    #[test]
    fn each_corruption_removes_one_valid(members in 2u8..6, corrupt in 1usize..6, byte in 0usize..64) {
        let fed = federation(members);
        let mut multisig = fed.create_multi_signature("round").unwrap();
        let corrupt = corrupt.min(members as usize);
        let victims: Vec<String> = multisig.signatures.keys().take(corrupt).cloned().collect();
        for victim in &victims {
            if let Some(signature) = multisig.signatures.get_mut(victim) {
                signature.0[byte] ^= 0x80;
            }
        }

        let report = fed.tally_multi_signature(&multisig, 1).unwrap();
        prop_assert_eq!(report.valid_count(), members as usize - corrupt);
        prop_assert_eq!(report.invalid.len(), corrupt);
    }
}
