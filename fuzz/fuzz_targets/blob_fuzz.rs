//! Fuzz test for persisted value decoding
//!
//! Flash can hold anything after a torn write. Record blobs and the FIFO
//! index must decode or fail with `Corrupt`, never panic.
//!
//! Run with: cargo +nightly fuzz run blob_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::{Measurement, MEASUREMENT_BLOB_LEN};
use strata_storage::FifoIndex;

fuzz_target!(|data: &[u8]| {
    match Measurement::from_blob("fuzz", data) {
        Ok(m) => {
            assert_eq!(data.len(), MEASUREMENT_BLOB_LEN);
            assert_eq!(m.to_blob().as_slice(), data);
        }
        Err(_) => {}
    }

    if let Ok(index) = FifoIndex::from_bytes(data) {
        assert_eq!(index.len() * 4, data.len());
        assert_eq!(index.to_bytes(), data);
    }
});
