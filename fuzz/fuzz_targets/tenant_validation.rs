#![no_main]

//! Fuzz target for tenant extraction on raw protobuf payloads.

use libfuzzer_sys::fuzz_target;
use promgate_core::{codec, tenant};

fuzz_target!(|data: &[u8]| {
    // Compress the input first so the fuzzer explores protobuf structure
    // rather than snappy framing.
    let compressed = match snap::raw::Encoder::new().compress_vec(data) {
        Ok(compressed) => compressed,
        Err(_) => return,
    };
    let Ok(request) = codec::decode(&compressed) else {
        return;
    };

    let tenants = tenant::extract_tenants(&request);
    match tenant::validate(&request) {
        Ok(id) => assert_eq!(tenants.keys().map(String::as_str).collect::<Vec<_>>(), vec![id.as_str()]),
        Err(_) => assert_ne!(tenants.len(), 1),
    }
});
