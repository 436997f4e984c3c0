#![no_main]

use libfuzzer_sys::fuzz_target;
use loom_core::key::{ExtendedPrivKey, ExtendedPubKey};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding must never panic; anything accepted re-encodes identically
    if let Ok((xprv, network)) = ExtendedPrivKey::decode(text) {
        assert_eq!(xprv.encode(network), text.trim());
        let xpub = xprv.to_extended_public().unwrap();
        assert_eq!(xpub.depth(), xprv.depth());
    }

    if let Ok((xpub, network)) = ExtendedPubKey::decode(text) {
        assert_eq!(xpub.encode(network), text.trim());
    }
});
