//! Fuzzer for the transport frame codec.
//!
//! Feeds arbitrary bytes to `Frame::decode` and checks that:
//! - decoding never panics, whatever the input;
//! - every successful decode re-encodes to the original bytes;
//! - inputs shorter than the id prefix are always rejected.

#![no_main]

use lantern_proto::{Frame, TxId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match Frame::decode(data) {
        Ok(frame) => {
            // Anything that decodes carried at least the id prefix.
            assert!(data.len() >= TxId::LEN);
            assert_eq!(frame.id.as_bytes(), &data[..TxId::LEN]);

            // Round trip must be identity.
            let wire = frame.encode_to_vec().expect("decoded frame re-encodes");
            assert_eq!(wire, data);
        },
        Err(_) => {
            // Short frames can never decode; longer rejects are fine too
            // (invalid UTF-8, oversized payloads).
        },
    }
});
