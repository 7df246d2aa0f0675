//! Offset-ordered view of a pack index.
//!
//! Pack entries do not record their compressed length, so the span of an
//! entry is bounded by the start of the entry that follows it. The reverse
//! index answers both "which object starts here" and "where does the next one
//! start".

use crate::index::PackIndex;
use crate::{PackError, Result};
use grove_storage::ObjectId;
use std::fmt;
use std::sync::Arc;

const MAX_SMALL_OFFSET: u64 = i32::MAX as u64;

/// Offset-sorted ranks of one pack index.
///
/// Offsets up to `i32::MAX` and larger offsets are kept in separate arrays;
/// every small offset sorts before every large one.
pub struct PackReverseIndex {
    index: Arc<dyn PackIndex>,
    offsets32: Vec<u32>,
    ranks32: Vec<u32>,
    offsets64: Vec<u64>,
    ranks64: Vec<u32>,
}

impl PackReverseIndex {
    /// Builds the reverse mapping for every object of `index`.
    pub fn build(index: Arc<dyn PackIndex>) -> Result<Self> {
        let mut small: Vec<(u32, u32)> = Vec::new();
        let mut large: Vec<(u64, u32)> = Vec::new();
        for rank in 0..index.object_count() {
            let offset = index.offset_at(rank).ok_or_else(|| {
                PackError::corrupt(format!("pack index has no offset for rank {}", rank))
            })?;
            if offset <= MAX_SMALL_OFFSET {
                small.push((offset as u32, rank));
            } else {
                large.push((offset, rank));
            }
        }
        small.sort_unstable();
        large.sort_unstable();

        let duplicate = small
            .windows(2)
            .find(|pair| pair[0].0 == pair[1].0)
            .map(|pair| u64::from(pair[0].0))
            .or_else(|| {
                large
                    .windows(2)
                    .find(|pair| pair[0].0 == pair[1].0)
                    .map(|pair| pair[0].0)
            });
        if let Some(offset) = duplicate {
            return Err(PackError::corrupt(format!(
                "two pack index entries share offset {}",
                offset
            )));
        }

        let (offsets32, ranks32) = small.into_iter().unzip();
        let (offsets64, ranks64) = large.into_iter().unzip();
        Ok(Self {
            index,
            offsets32,
            ranks32,
            offsets64,
            ranks64,
        })
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.offsets32.len() + self.offsets64.len()
    }

    /// Returns true if the pack has no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward-index rank of the object starting exactly at `offset`.
    pub fn find_rank(&self, offset: u64) -> Option<u32> {
        self.position(offset).map(|pos| self.rank_at(pos))
    }

    /// Id of the object starting exactly at `offset`, `None` if no object
    /// starts there.
    pub fn find_object(&self, offset: u64) -> Option<ObjectId> {
        self.find_rank(offset)
            .and_then(|rank| self.index.object_id_at(rank))
    }

    /// Start of the object following the one at `offset`, or `max_offset`
    /// for the last object.
    ///
    /// `offset` must be an object start; anything else is corruption.
    pub fn find_next_offset(&self, offset: u64, max_offset: u64) -> Result<u64> {
        let pos = self.position(offset).ok_or_else(|| {
            PackError::corrupt(format!("no object starts at pack offset {}", offset))
        })?;
        Ok(self.offset_at(pos + 1).unwrap_or(max_offset))
    }

    /// Object start offsets in ascending order.
    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.offsets32
            .iter()
            .map(|&o| u64::from(o))
            .chain(self.offsets64.iter().copied())
    }

    /// Position of `offset` in the combined ascending order.
    fn position(&self, offset: u64) -> Option<usize> {
        if offset <= MAX_SMALL_OFFSET {
            self.offsets32.binary_search(&(offset as u32)).ok()
        } else {
            self.offsets64
                .binary_search(&offset)
                .ok()
                .map(|pos| self.offsets32.len() + pos)
        }
    }

    fn offset_at(&self, pos: usize) -> Option<u64> {
        match self.offsets32.get(pos) {
            Some(&offset) => Some(u64::from(offset)),
            None => self.offsets64.get(pos - self.offsets32.len()).copied(),
        }
    }

    fn rank_at(&self, pos: usize) -> u32 {
        match self.ranks32.get(pos) {
            Some(&rank) => rank,
            None => self.ranks64[pos - self.ranks32.len()],
        }
    }
}

impl fmt::Debug for PackReverseIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackReverseIndex")
            .field("small_offsets", &self.offsets32.len())
            .field("large_offsets", &self.offsets64.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{parse_index, write_index, IndexEntry, IndexVersion};
    use bytes::Bytes;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; 20])
    }

    fn reverse(entries: &[IndexEntry]) -> PackReverseIndex {
        let mut buf = Vec::new();
        write_index(&mut buf, IndexVersion::V2, entries, &[0; 20]).unwrap();
        PackReverseIndex::build(parse_index(Bytes::from(buf)).unwrap()).unwrap()
    }

    fn mixed_entries() -> Vec<IndexEntry> {
        vec![
            IndexEntry::new(id(0x50), 12, 0),
            IndexEntry::new(id(0x10), 0x9000_0000, 0),
            IndexEntry::new(id(0x40), 300, 0),
            IndexEntry::new(id(0x30), 0x7fff_ff00, 0),
            IndexEntry::new(id(0x20), 7 << 32, 0),
        ]
    }

    #[test]
    fn test_find_object() {
        let rev = reverse(&mixed_entries());
        assert_eq!(rev.len(), 5);
        for entry in mixed_entries() {
            assert_eq!(rev.find_object(entry.offset), Some(entry.id));
        }
        assert_eq!(rev.find_object(13), None);
        assert_eq!(rev.find_object(0x9000_0001), None);
    }

    #[test]
    fn test_next_offset_crosses_into_large_offsets() {
        let rev = reverse(&mixed_entries());
        let max = (7 << 32) + 500;
        assert_eq!(rev.find_next_offset(12, max).unwrap(), 300);
        assert_eq!(rev.find_next_offset(300, max).unwrap(), 0x7fff_ff00);
        assert_eq!(rev.find_next_offset(0x7fff_ff00, max).unwrap(), 0x9000_0000);
        assert_eq!(rev.find_next_offset(0x9000_0000, max).unwrap(), 7 << 32);
        assert_eq!(rev.find_next_offset(7 << 32, max).unwrap(), max);
    }

    #[test]
    fn test_next_offset_requires_object_start() {
        let rev = reverse(&mixed_entries());
        let err = rev.find_next_offset(100, 1000).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_single_object() {
        let rev = reverse(&[IndexEntry::new(id(1), 12, 0)]);
        assert_eq!(rev.find_next_offset(12, 99).unwrap(), 99);
        assert_eq!(rev.offsets().collect::<Vec<_>>(), vec![12]);
    }

    #[test]
    fn test_offsets_ascending() {
        let rev = reverse(&mixed_entries());
        let offsets: Vec<u64> = rev.offsets().collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(offsets.len(), 5);
    }

    #[test]
    fn test_rejects_shared_offset() {
        let mut buf = Vec::new();
        write_index(
            &mut buf,
            IndexVersion::V1,
            &[IndexEntry::new(id(1), 12, 0), IndexEntry::new(id(2), 12, 0)],
            &[0; 20],
        )
        .unwrap();
        let index = parse_index(Bytes::from(buf)).unwrap();
        assert!(PackReverseIndex::build(index).is_err());
    }
}
