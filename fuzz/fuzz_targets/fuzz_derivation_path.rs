#![no_main]

use libfuzzer_sys::fuzz_target;
use loom_core::key::{DerivationPath, PathComponent};

fuzz_target!(|data: &[u8]| {
    // Textual paths such as m/44'/0'/0'/0/1
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(path) = text.parse::<DerivationPath>() {
            let rendered = path.to_string_path();
            let reparsed: DerivationPath = rendered.parse().unwrap();
            assert_eq!(path, reparsed);
            assert_eq!(rendered, reparsed.to_string_path());
        }
    }

    // Raw component values
    let components: Vec<PathComponent> = data
        .chunks_exact(4)
        .take(8)
        .map(|c| PathComponent::from_value(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    let path = DerivationPath::new(components.clone());
    assert_eq!(path.depth(), components.len());
    let reparsed: DerivationPath = path.to_string_path().parse().unwrap();
    assert_eq!(path, reparsed);
});
