//! Pack index: the sorted `id -> (offset, crc32)` side file of a pack.
//!
//! Two on-disk formats exist. Version 1 stores `(offset, id)` records and
//! has no CRCs. Version 2 stores ids, CRCs and offsets in separate tables
//! and spills offsets at or above 2^31 into a 64-bit table. Both start the
//! search with a 256-entry fan-out table so a lookup only binary-searches
//! the ids sharing the first byte of the wanted id.

mod v1;
mod v2;
mod writer;

pub use v1::PackIndexV1;
pub use v2::PackIndexV2;
pub use writer::{write_index, IndexEntry};

use crate::{PackError, Result};
use bytes::Bytes;
use grove_storage::ObjectId;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Signature that opens a version 2 index.
pub const INDEX_V2_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];

const FANOUT_ENTRIES: usize = 256;
const FANOUT_LEN: usize = FANOUT_ENTRIES * 4;
/// Pack checksum followed by the index checksum.
const TRAILER_LEN: usize = 2 * ObjectId::LEN;

/// Index file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexVersion {
    /// Fan-out plus `(offset, id)` records; 32-bit offsets, no CRCs.
    V1,
    /// Separate id, CRC and offset tables with a 64-bit overflow table.
    V2,
}

impl IndexVersion {
    /// Numeric format version.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Returns the oldest format able to describe every entry.
    pub fn oldest_for(entries: &[IndexEntry]) -> Self {
        if entries.iter().all(|e| writer::fits_v1(e.offset)) {
            Self::V1
        } else {
            Self::V2
        }
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u32())
    }
}

/// One object as recorded by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedObject {
    /// Object id.
    pub id: ObjectId,
    /// Offset of the object's header in the pack.
    pub offset: u64,
    /// CRC32 of the object's raw pack bytes, when the format records it.
    pub crc32: Option<u32>,
}

/// Read access to a loaded pack index.
///
/// Ranks are positions in id order, `0..object_count()`.
pub trait PackIndex: Send + Sync + fmt::Debug {
    /// Format of the loaded file.
    fn version(&self) -> IndexVersion;

    /// Number of objects described.
    fn object_count(&self) -> u32;

    /// Rank of `id`, if present.
    fn find_rank(&self, id: &ObjectId) -> Option<u32>;

    /// Id at `rank`.
    fn object_id_at(&self, rank: u32) -> Option<ObjectId>;

    /// Pack offset of the object at `rank`.
    fn offset_at(&self, rank: u32) -> Option<u64>;

    /// CRC32 of the object at `rank`. Fails with `Unsupported` on formats
    /// without CRCs.
    fn crc32_at(&self, rank: u32) -> Result<Option<u32>>;

    /// Checksum of the pack this index describes.
    fn pack_checksum(&self) -> [u8; 20];

    /// Pack offset of `id`.
    fn find_offset(&self, id: &ObjectId) -> Option<u64> {
        self.find_rank(id).and_then(|rank| self.offset_at(rank))
    }

    /// CRC32 recorded for `id`, `None` if the id is absent.
    fn find_crc32(&self, id: &ObjectId) -> Result<Option<u32>> {
        match self.find_rank(id) {
            Some(rank) => self.crc32_at(rank),
            None => Ok(None),
        }
    }

    /// Returns true if `id` is described.
    fn contains(&self, id: &ObjectId) -> bool {
        self.find_rank(id).is_some()
    }
}

impl dyn PackIndex {
    /// Iterates every object in ascending id order.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            index: self,
            rank: 0,
        }
    }
}

/// Iterator returned by `entries()`.
pub struct Entries<'a> {
    index: &'a dyn PackIndex,
    rank: u32,
}

impl Iterator for Entries<'_> {
    type Item = IndexedObject;

    fn next(&mut self) -> Option<Self::Item> {
        let rank = self.rank;
        let id = self.index.object_id_at(rank)?;
        let offset = self.index.offset_at(rank)?;
        let crc32 = self.index.crc32_at(rank).ok().flatten();
        self.rank += 1;
        Some(IndexedObject { id, offset, crc32 })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.index.object_count().saturating_sub(self.rank) as usize;
        (left, Some(left))
    }
}

/// Parses an index held in memory, detecting its version.
pub fn parse_index(data: Bytes) -> Result<Arc<dyn PackIndex>> {
    let index: Arc<dyn PackIndex> = if data.starts_with(&INDEX_V2_SIGNATURE) {
        let version = read_u32(&data, 4)
            .ok_or_else(|| PackError::corrupt("pack index header truncated"))?;
        match version {
            2 => Arc::new(PackIndexV2::parse(data)?),
            other => {
                return Err(PackError::Unsupported(format!(
                    "pack index version {}",
                    other
                )))
            }
        }
    } else {
        Arc::new(PackIndexV1::parse(data)?)
    };
    Ok(index)
}

/// Reads and parses an index file.
pub fn read_index(path: &Path) -> Result<Arc<dyn PackIndex>> {
    let data = std::fs::read(path)?;
    let index = parse_index(Bytes::from(data)).map_err(|e| match e {
        PackError::CorruptObject { id, reason } => PackError::CorruptObject {
            id,
            reason: format!("{}: {}", path.display(), reason),
        },
        other => other,
    })?;
    debug!(
        index = %path.display(),
        version = %index.version(),
        objects = index.object_count(),
        "loaded pack index"
    );
    Ok(index)
}

/// Cumulative per-first-byte counts.
#[derive(Clone)]
pub(crate) struct FanOut([u32; FANOUT_ENTRIES]);

impl FanOut {
    /// Decodes the table at the start of `data` and checks it never decreases.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let raw = data
            .get(..FANOUT_LEN)
            .ok_or_else(|| PackError::corrupt("pack index fan-out table truncated"))?;
        let mut counts = [0u32; FANOUT_ENTRIES];
        for (slot, chunk) in counts.iter_mut().zip(raw.chunks_exact(4)) {
            *slot = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        if counts.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(PackError::corrupt("pack index fan-out table decreases"));
        }
        Ok(Self(counts))
    }

    /// Builds the table for ids already sorted ascending.
    pub(crate) fn from_sorted<'a>(ids: impl Iterator<Item = &'a ObjectId>) -> Self {
        let mut counts = [0u32; FANOUT_ENTRIES];
        for id in ids {
            counts[id.first_byte() as usize] += 1;
        }
        for i in 1..FANOUT_ENTRIES {
            counts[i] += counts[i - 1];
        }
        Self(counts)
    }

    /// Total number of ids.
    pub(crate) fn total(&self) -> u32 {
        self.0[FANOUT_ENTRIES - 1]
    }

    /// Ranks of the ids whose first byte is `first`.
    pub(crate) fn bucket(&self, first: u8) -> Range<u32> {
        let end = self.0[first as usize];
        let start = match first {
            0 => 0,
            n => self.0[n as usize - 1],
        };
        start..end
    }

    pub(crate) fn write_to(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for count in self.0 {
            out.write_all(&count.to_be_bytes())?;
        }
        Ok(())
    }
}

/// Binary-searches the fan-out bucket of `id`. `raw_id(rank)` returns the
/// 20 stored id bytes at `rank`; ids in a bucket share the first byte so only
/// the remaining 19 are compared.
pub(crate) fn search<'a>(
    fanout: &FanOut,
    id: &ObjectId,
    raw_id: impl Fn(u32) -> &'a [u8],
) -> Option<u32> {
    let bucket = fanout.bucket(id.first_byte());
    let wanted = &id.as_bytes()[1..];
    let (mut low, mut high) = (bucket.start, bucket.end);
    while low < high {
        let mid = low + (high - low) / 2;
        match raw_id(mid)[1..ObjectId::LEN].cmp(wanted) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Some(mid),
        }
    }
    None
}

/// Checks that ids are strictly ascending and agree with the fan-out table.
pub(crate) fn validate_ids<'a>(
    fanout: &FanOut,
    count: u32,
    raw_id: impl Fn(u32) -> &'a [u8],
) -> Result<()> {
    let mut previous: Option<ObjectId> = None;
    for rank in 0..count {
        let current = ObjectId::from_slice(raw_id(rank))
            .ok_or_else(|| PackError::corrupt("pack index id table truncated"))?;
        if let Some(prev) = previous {
            match prev.cmp(&current) {
                Ordering::Less => {}
                Ordering::Equal => {
                    return Err(PackError::corrupt_object(
                        current,
                        "listed twice in pack index",
                    ))
                }
                Ordering::Greater => {
                    return Err(PackError::corrupt(format!(
                        "pack index ids out of order at rank {}",
                        rank
                    )))
                }
            }
        }
        if !fanout.bucket(current.first_byte()).contains(&rank) {
            return Err(PackError::corrupt(format!(
                "pack index fan-out disagrees with id at rank {}",
                rank
            )));
        }
        previous = Some(current);
    }
    Ok(())
}

/// Verifies the trailing index checksum and returns the pack checksum.
pub(crate) fn check_trailer(data: &[u8]) -> Result<[u8; 20]> {
    if data.len() < TRAILER_LEN {
        return Err(PackError::corrupt("pack index trailer truncated"));
    }
    let body_end = data.len() - ObjectId::LEN;
    let digest = Sha1::digest(&data[..body_end]);
    if digest.as_slice() != &data[body_end..] {
        return Err(PackError::corrupt("pack index checksum mismatch"));
    }
    let mut pack_checksum = [0u8; 20];
    pack_checksum.copy_from_slice(&data[body_end - ObjectId::LEN..body_end]);
    Ok(pack_checksum)
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let raw = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let raw: [u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn entries_strategy() -> impl Strategy<Value = Vec<IndexEntry>> {
        prop::collection::btree_map(any::<[u8; 20]>(), (any::<u64>(), any::<u32>()), 0..200)
            .prop_map(|map: BTreeMap<[u8; 20], (u64, u32)>| {
                map.into_iter()
                    .map(|(raw, (offset, crc))| {
                        IndexEntry::new(ObjectId::from_bytes(raw), offset >> 24, crc)
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_v2_finds_every_entry(entries in entries_strategy(), needle in any::<[u8; 20]>()) {
            let mut buf = Vec::new();
            write_index(&mut buf, IndexVersion::V2, &entries, &[0; 20]).unwrap();
            let index = parse_index(Bytes::from(buf)).unwrap();
            for entry in &entries {
                prop_assert_eq!(index.find_offset(&entry.id), Some(entry.offset));
                prop_assert_eq!(index.find_crc32(&entry.id).unwrap(), Some(entry.crc32));
            }
            let needle = ObjectId::from_bytes(needle);
            let expected = entries.iter().find(|e| e.id == needle).map(|e| e.offset);
            prop_assert_eq!(index.find_offset(&needle), expected);
        }

        #[test]
        fn prop_v1_finds_small_offsets(entries in entries_strategy()) {
            let entries: Vec<IndexEntry> = entries
                .into_iter()
                .map(|e| IndexEntry::new(e.id, e.offset & 0x7fff_ffff, e.crc32))
                .collect();
            let mut buf = Vec::new();
            write_index(&mut buf, IndexVersion::V1, &entries, &[0; 20]).unwrap();
            let index = parse_index(Bytes::from(buf)).unwrap();
            for entry in &entries {
                prop_assert_eq!(index.find_offset(&entry.id), Some(entry.offset));
            }
        }

        #[test]
        fn prop_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            let _ = parse_index(Bytes::from(data));
        }
    }
}
