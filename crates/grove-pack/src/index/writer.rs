//! Serializes pack indexes in either format.

use super::v2::LARGE_OFFSET_FLAG;
use super::{FanOut, IndexVersion, INDEX_V2_SIGNATURE};
use crate::{PackError, Result};
use grove_storage::ObjectId;
use sha1::{Digest, Sha1};
use std::io::{self, Write};

/// Largest offset stored directly in a version 2 offset slot.
const MAX_DIRECT_OFFSET: u64 = 0x7fff_ffff;

/// One object to record in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Object id.
    pub id: ObjectId,
    /// Offset of the object's header in the pack.
    pub offset: u64,
    /// CRC32 of the object's raw pack bytes.
    pub crc32: u32,
}

impl IndexEntry {
    /// Creates an entry.
    pub fn new(id: ObjectId, offset: u64, crc32: u32) -> Self {
        Self { id, offset, crc32 }
    }
}

/// Returns true if a version 1 index can record `offset`.
pub(crate) fn fits_v1(offset: u64) -> bool {
    (offset >> 1) < i32::MAX as u64
}

/// Writes an index describing `entries` and returns the index checksum.
///
/// Entries may be given in any order; they are written sorted by id. Ids must
/// be unique. A version 1 index fails with `PackTooLarge` for offsets it
/// cannot represent.
pub fn write_index<W: Write>(
    out: W,
    version: IndexVersion,
    entries: &[IndexEntry],
    pack_checksum: &[u8; 20],
) -> Result<[u8; 20]> {
    let mut sorted = entries.to_vec();
    sorted.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(PackError::corrupt_object(
            pair[0].id,
            "cannot index the same object twice",
        ));
    }
    if u32::try_from(sorted.len()).is_err() {
        return Err(PackError::Unsupported(format!(
            "{} objects exceed the index format",
            sorted.len()
        )));
    }

    let mut out = HashingWriter::new(out);
    let fanout = FanOut::from_sorted(sorted.iter().map(|e| &e.id));
    match version {
        IndexVersion::V1 => write_v1(&mut out, &fanout, &sorted)?,
        IndexVersion::V2 => write_v2(&mut out, &fanout, &sorted)?,
    }
    out.write_all(pack_checksum)?;
    let checksum = out.finish()?;
    Ok(checksum)
}

fn write_v1<W: Write>(
    out: &mut HashingWriter<W>,
    fanout: &FanOut,
    entries: &[IndexEntry],
) -> Result<()> {
    if let Some(entry) = entries.iter().find(|e| !fits_v1(e.offset)) {
        return Err(PackError::PackTooLarge {
            offset: entry.offset,
        });
    }
    fanout.write_to(out)?;
    for entry in entries {
        out.write_all(&(entry.offset as u32).to_be_bytes())?;
        out.write_all(entry.id.as_bytes())?;
    }
    Ok(())
}

fn write_v2<W: Write>(
    out: &mut HashingWriter<W>,
    fanout: &FanOut,
    entries: &[IndexEntry],
) -> Result<()> {
    out.write_all(&INDEX_V2_SIGNATURE)?;
    out.write_all(&IndexVersion::V2.as_u32().to_be_bytes())?;
    fanout.write_to(out)?;
    for entry in entries {
        out.write_all(entry.id.as_bytes())?;
    }
    for entry in entries {
        out.write_all(&entry.crc32.to_be_bytes())?;
    }
    let mut large = Vec::new();
    for entry in entries {
        let slot = if entry.offset > MAX_DIRECT_OFFSET {
            let slot = LARGE_OFFSET_FLAG | large.len() as u32;
            large.push(entry.offset);
            slot
        } else {
            entry.offset as u32
        };
        out.write_all(&slot.to_be_bytes())?;
    }
    for offset in large {
        out.write_all(&offset.to_be_bytes())?;
    }
    Ok(())
}

/// Forwards writes while hashing them; `finish` appends the digest.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
        }
    }

    fn finish(mut self) -> io::Result<[u8; 20]> {
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&self.hasher.finalize());
        self.inner.write_all(&digest)?;
        self.inner.flush()?;
        Ok(digest)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
