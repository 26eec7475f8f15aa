#![no_main]

use libfuzzer_sys::fuzz_target;
use request_broker::config::MAX_ENVELOPE_SIZE;
use request_broker::core::serialization::decode_descriptor;

fuzz_target!(|data: &[u8]| {
    // Fuzz descriptor decoding - test for panics, crashes, runaway allocations
    let _ = decode_descriptor(data, MAX_ENVELOPE_SIZE);
});
