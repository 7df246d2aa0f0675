//! Delta instruction streams.
//!
//! A delta starts with two size varints (base length, result length) and
//! continues with copy and insert instructions:
//!
//! - `1xxxxxxx` copy: the low four bits select which offset bytes follow,
//!   the next three which size bytes follow, both little-endian. A size of
//!   zero means `0x10000`.
//! - `0nnnnnnn` insert: the next `n` bytes (1 to 127) are literal output.
//!   `n == 0` is reserved.

use crate::{PackError, Result};

/// Size a copy instruction means when it encodes zero.
const DEFAULT_COPY_SIZE: usize = 0x10000;
/// Upper bound on the buffer reserved before any instruction runs.
const MAX_PREALLOC: usize = 64 << 20;

/// Reads the `(base size, result size)` header of a delta.
pub fn delta_sizes(delta: &[u8]) -> Result<(u64, u64)> {
    let mut pos = 0;
    let base = read_size(delta, &mut pos)?;
    let result = read_size(delta, &mut pos)?;
    Ok((base, result))
}

/// Applies `delta` to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    let result_size = read_size(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(PackError::corrupt(format!(
            "delta expects a {} byte base, got {} bytes",
            base_size,
            base.len()
        )));
    }
    let result_size = usize::try_from(result_size).map_err(|_| {
        PackError::corrupt(format!("delta result size {} does not fit memory", result_size))
    })?;

    let mut out = Vec::with_capacity(result_size.min(MAX_PREALLOC));
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    offset |= usize::from(next_byte(delta, &mut pos)?) << (8 * i);
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    size |= usize::from(next_byte(delta, &mut pos)?) << (8 * i);
                }
            }
            if size == 0 {
                size = DEFAULT_COPY_SIZE;
            }
            let chunk = offset
                .checked_add(size)
                .and_then(|end| base.get(offset..end))
                .ok_or_else(|| {
                    PackError::corrupt(format!(
                        "delta copies {} bytes at {} from a {} byte base",
                        size,
                        offset,
                        base.len()
                    ))
                })?;
            if out.len() + chunk.len() > result_size {
                return Err(overrun(result_size));
            }
            out.extend_from_slice(chunk);
        } else if cmd != 0 {
            let len = usize::from(cmd);
            let literal = delta.get(pos..pos + len).ok_or_else(|| {
                PackError::corrupt("delta insert runs past the end of the delta")
            })?;
            if out.len() + len > result_size {
                return Err(overrun(result_size));
            }
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(PackError::corrupt("reserved delta instruction 0"));
        }
    }

    if out.len() != result_size {
        return Err(PackError::corrupt(format!(
            "delta produced {} bytes, header declared {}",
            out.len(),
            result_size
        )));
    }
    Ok(out)
}

fn overrun(result_size: usize) -> PackError {
    PackError::corrupt(format!(
        "delta writes past its declared {} byte result",
        result_size
    ))
}

fn next_byte(delta: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *delta
        .get(*pos)
        .ok_or_else(|| PackError::corrupt("delta instruction truncated"))?;
    *pos += 1;
    Ok(byte)
}

fn read_size(delta: &[u8], pos: &mut usize) -> Result<u64> {
    let mut size = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| PackError::corrupt("delta header truncated"))?;
        *pos += 1;
        let bits = u64::from(byte & 0x7f);
        if shift > 63 || (bits << shift) >> shift != bits {
            return Err(PackError::corrupt("delta header size overflows"));
        }
        size |= bits << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::build;
    use super::*;

    #[test]
    fn test_copy_and_insert() {
        let base = b"the quick brown fox jumps over the lazy dog";
        let mut delta = build::header(base.len() as u64, 25);
        build::copy(&mut delta, 4, 5); // "quick"
        build::insert(&mut delta, b" red ");
        build::copy(&mut delta, 16, 3); // "fox"
        build::insert(&mut delta, b" naps today!");
        let out = apply_delta(base, &delta).unwrap();
        assert_eq!(out, b"quick red fox naps today!");
    }

    #[test]
    fn test_sizes() {
        let delta = build::header(300, 70000);
        assert_eq!(delta_sizes(&delta).unwrap(), (300, 70000));
    }

    #[test]
    fn test_zero_size_copy_means_64k() {
        let base = vec![9u8; 0x10000 + 10];
        let mut delta = build::header(base.len() as u64, 0x10000);
        delta.push(0x80); // copy, offset 0, size 0
        let out = apply_delta(&base, &delta).unwrap();
        assert_eq!(out.len(), 0x10000);
    }

    #[test]
    fn test_result_length_mismatch() {
        let base = b"abcdef";
        let mut delta = build::header(6, 10);
        build::copy(&mut delta, 0, 6);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("declared 10"));

        let mut delta = build::header(6, 3);
        build::copy(&mut delta, 0, 6);
        assert!(apply_delta(base, &delta).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_base_size_mismatch() {
        let mut delta = build::header(7, 1);
        build::insert(&mut delta, b"x");
        assert!(apply_delta(b"abcdef", &delta).is_err());
    }

    #[test]
    fn test_copy_out_of_range() {
        let mut delta = build::header(6, 4);
        build::copy(&mut delta, 4, 4);
        assert!(apply_delta(b"abcdef", &delta).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_reserved_instruction() {
        let mut delta = build::header(1, 1);
        delta.push(0);
        assert!(apply_delta(b"a", &delta).is_err());
    }

    #[test]
    fn test_truncated_insert() {
        let mut delta = build::header(1, 5);
        delta.extend([5, b'a', b'b']);
        assert!(apply_delta(b"a", &delta).is_err());
    }

    #[test]
    fn test_empty_result() {
        let delta = build::header(3, 0);
        assert_eq!(apply_delta(b"abc", &delta).unwrap(), Vec::<u8>::new());
    }
}
