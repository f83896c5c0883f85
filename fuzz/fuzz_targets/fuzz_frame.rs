#![no_main]

use libfuzzer_sys::fuzz_target;
use neurolamp_protocol::core::frame::{decode, RawFrame};
use neurolamp_protocol::CipherKey;

fuzz_target!(|data: &[u8]| {
    // Framing checks and decryption must reject, never panic
    let _ = RawFrame::parse(data);
    if let Ok(key) = CipherKey::from_slice(b"0123456789abcdef") {
        let _ = decode(data, &key);
    }
});
