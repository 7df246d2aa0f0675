//! Fuzz target for pack index parsing.
//!
//! Tests that v1 and v2 index parsing handles arbitrary input without
//! panicking, and that every lookup on an accepted index stays in bounds.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(index) = grove_pack::parse_index(Bytes::copy_from_slice(data)) else {
        return;
    };

    for entry in index.entries() {
        assert_eq!(index.find_offset(&entry.id), Some(entry.offset));
    }
    let _ = grove_pack::PackReverseIndex::build(index);
});
