#![no_main]

use libfuzzer_sys::fuzz_target;
use loom_core::key::cipher::{open, seal, KEY_SIZE, NONCE_SIZE};

const KEY: [u8; KEY_SIZE] = [0x5a; KEY_SIZE];

fuzz_target!(|data: &[u8]| {
    // Arbitrary text must be rejected cleanly
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = open(&KEY, text);
    }

    // Sealed data opens back to the plaintext
    if data.len() >= NONCE_SIZE {
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&data[..NONCE_SIZE]);
        let sealed = seal(&KEY, &iv, &data[NONCE_SIZE..]).unwrap();
        assert_eq!(open(&KEY, &sealed).unwrap(), &data[NONCE_SIZE..]);
    }
});
