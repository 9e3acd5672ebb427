//! Fuzz target for refresh-message decoding.
//!
//! Feeds arbitrary bytes to `RefreshMessage::decode`. Every input must decode
//! to `Ok(...)` or `Err(StorageError)`, and every decoded message must survive
//! an encode/decode cycle unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;

use paygate_storage::{RefreshKind, RefreshMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(message) = RefreshMessage::decode(data) else {
        return;
    };

    // A config change without a profile is accepted on the wire; the
    // listener drops it later.
    if message.kind == RefreshKind::ConfigChange && message.profile_id.is_some() {
        assert!(message.identity().is_some());
    }

    let encoded = message.encode().expect("decoded message must re-encode");
    let decoded = RefreshMessage::decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(decoded, message);
});
