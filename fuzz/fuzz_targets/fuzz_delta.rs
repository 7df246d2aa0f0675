//! Fuzz target for delta application.
//!
//! Tests that arbitrary delta streams never panic and that any accepted
//! result has the length the delta header declares.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    base: Vec<u8>,
    delta: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(out) = grove_pack::apply_delta(&input.base, &input.delta) {
        let (base_size, result_size) = grove_pack::delta_sizes(&input.delta).unwrap();
        assert_eq!(base_size, input.base.len() as u64);
        assert_eq!(result_size, out.len() as u64);
    }
});
