#![no_main]

//! Fuzz target for remote-write body decoding.
//!
//! Request bodies come straight off the network, so decoding must reject
//! arbitrary bytes with an error and never panic or allocate past the
//! decompression ceiling.

use libfuzzer_sys::fuzz_target;
use promgate_core::codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = codec::decode(data) {
        // Anything that decodes must survive re-encoding and decode to the
        // same message.
        let encoded = codec::encode(&request).expect("decoded request must re-encode");
        let decoded = codec::decode(&encoded).expect("re-encoded request must decode");
        assert_eq!(decoded, request);
    }
});
