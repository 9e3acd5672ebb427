//! Fuzz target for stored configuration records and key components.
//!
//! Arbitrary bytes are parsed as an at-rest record and opened with a fixed
//! codec; arbitrary strings are run through the key escaping functions.
//! Nothing may panic, and escaping must always reverse.

#![no_main]

use libfuzzer_sys::fuzz_target;

use paygate_storage::{
    AesGcmSecretCodec, StoredConfigRecord,
    keys::{escape_component, unescape_component},
};

fuzz_target!(|data: &[u8]| {
    if let Ok(stored) = StoredConfigRecord::decode(data) {
        let codec = AesGcmSecretCodec::new(&[0x5a; 32]).expect("32-byte key");
        // Random ciphertext must fail authentication, never panic
        let _ = stored.open(&codec);
        let _ = stored.encode();
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let escaped = escape_component(text);
    assert!(!escaped.contains(':'));
    assert_eq!(unescape_component(&escaped).as_deref(), Some(text));

    // Unescaping untrusted input must not panic
    let _ = unescape_component(text);
});
