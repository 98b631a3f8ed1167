//! Fuzz test for inbound message parsing
//!
//! Queries and edge responses arrive from the network; any byte sequence
//! must parse to a value or an error, never a panic.
//!
//! Run with: cargo +nightly fuzz run message_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::wire::{EdgeResponse, InboundQuery};
use strata_core::MessageError;

fuzz_target!(|data: &[u8]| {
    // Inverted ranges parse; the router answers them with an error payload.
    if let Err(MessageError::InvalidRange { start, end }) = InboundQuery::parse(data) {
        panic!("range {}..{} rejected at parse time", start, end);
    }

    if let Ok(response) = EdgeResponse::parse(data) {
        // Parsed values survive a trip back through the encoder.
        let bytes = strata_core::wire::encode(&response);
        assert!(bytes.is_ok(), "Parsed response should re-encode");
    }
});
