//! Version 1 index: fan-out, then `(4-byte offset, 20-byte id)` records.

use super::{
    check_trailer, read_u32, search, validate_ids, FanOut, IndexVersion, PackIndex, FANOUT_LEN,
    TRAILER_LEN,
};
use crate::{PackError, Result};
use bytes::Bytes;
use grove_storage::ObjectId;
use std::fmt;

const RECORD_LEN: usize = 4 + ObjectId::LEN;

/// A parsed version 1 pack index.
pub struct PackIndexV1 {
    data: Bytes,
    fanout: FanOut,
    count: u32,
    pack_checksum: [u8; 20],
}

impl PackIndexV1 {
    /// Validates and wraps the raw bytes of a version 1 index.
    pub fn parse(data: Bytes) -> Result<Self> {
        let fanout = FanOut::parse(&data)?;
        let count = fanout.total();
        let expected = (count as usize)
            .checked_mul(RECORD_LEN)
            .and_then(|records| records.checked_add(FANOUT_LEN + TRAILER_LEN))
            .ok_or_else(|| PackError::corrupt("pack index object count overflows"))?;
        if data.len() != expected {
            return Err(PackError::corrupt(format!(
                "v1 pack index is {} bytes, {} objects need {}",
                data.len(),
                count,
                expected
            )));
        }
        let pack_checksum = check_trailer(&data)?;
        let index = Self {
            data,
            fanout,
            count,
            pack_checksum,
        };
        validate_ids(&index.fanout, count, |rank| index.raw_id(rank))?;
        Ok(index)
    }

    fn record(&self, rank: u32) -> usize {
        FANOUT_LEN + rank as usize * RECORD_LEN
    }

    fn raw_id(&self, rank: u32) -> &[u8] {
        let at = self.record(rank) + 4;
        &self.data[at..at + ObjectId::LEN]
    }
}

impl PackIndex for PackIndexV1 {
    fn version(&self) -> IndexVersion {
        IndexVersion::V1
    }

    fn object_count(&self) -> u32 {
        self.count
    }

    fn find_rank(&self, id: &ObjectId) -> Option<u32> {
        search(&self.fanout, id, |rank| self.raw_id(rank))
    }

    fn object_id_at(&self, rank: u32) -> Option<ObjectId> {
        if rank >= self.count {
            return None;
        }
        ObjectId::from_slice(self.raw_id(rank))
    }

    fn offset_at(&self, rank: u32) -> Option<u64> {
        if rank >= self.count {
            return None;
        }
        read_u32(&self.data, self.record(rank)).map(u64::from)
    }

    fn crc32_at(&self, _rank: u32) -> Result<Option<u32>> {
        Err(PackError::Unsupported(
            "version 1 pack indexes do not record CRC32".to_string(),
        ))
    }

    fn pack_checksum(&self) -> [u8; 20] {
        self.pack_checksum
    }
}

impl fmt::Debug for PackIndexV1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackIndexV1")
            .field("objects", &self.count)
            .finish()
    }
}
