#![no_main]

use libfuzzer_sys::fuzz_target;
use neurolamp_protocol::protocol::message::{parse_status_payload, strip_control_response};

fuzz_target!(|data: &[u8]| {
    let _ = parse_status_payload(data);
    let _ = strip_control_response(data);
});
