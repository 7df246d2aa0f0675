//! Fuzz target for pack entry header decoding.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    header_offset: u64,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(loader) = grove_pack::decode_object_header(&input.bytes, input.header_offset) {
        assert!(loader.data_offset() > loader.header_offset());
        if let Some(base) = loader.base_offset() {
            assert!(base < loader.header_offset());
        }
    }
});
