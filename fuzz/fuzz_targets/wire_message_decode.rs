#![no_main]
use libfuzzer_sys::fuzz_target;

use ember::core::wire::WireMessage;

fuzz_target!(|data: &[u8]| {
    // Best-effort: the wire envelope is untrusted input straight off the
    // swarm, so decoding arbitrary bytes must never panic regardless of
    // how malformed they are.
    let _ = serde_json::from_slice::<WireMessage>(data);
});
