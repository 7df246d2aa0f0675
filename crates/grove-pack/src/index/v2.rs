//! Version 2 index: separate id, CRC32 and offset tables plus a 64-bit
//! offset table for packs beyond 2 GiB.

use super::{
    check_trailer, read_u32, read_u64, search, validate_ids, FanOut, IndexVersion, PackIndex,
    FANOUT_LEN, TRAILER_LEN,
};
use crate::{PackError, Result};
use bytes::Bytes;
use grove_storage::ObjectId;
use std::fmt;

const HEADER_LEN: usize = 8;
/// Set on a 32-bit offset that indexes the 64-bit table instead.
pub(crate) const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// A parsed version 2 pack index.
pub struct PackIndexV2 {
    data: Bytes,
    fanout: FanOut,
    count: u32,
    ids_at: usize,
    crcs_at: usize,
    offsets_at: usize,
    large_offsets_at: usize,
    large_count: usize,
    pack_checksum: [u8; 20],
}

impl PackIndexV2 {
    /// Validates and wraps the raw bytes of a version 2 index.
    ///
    /// Every reference into the 64-bit table is checked here, so lookups on
    /// a parsed index cannot fail.
    pub fn parse(data: Bytes) -> Result<Self> {
        let fanout = FanOut::parse(data.get(HEADER_LEN..).unwrap_or_default())?;
        let count = fanout.total();
        let n = count as usize;

        let ids_at = HEADER_LEN + FANOUT_LEN;
        let crcs_at = n
            .checked_mul(ObjectId::LEN)
            .and_then(|len| len.checked_add(ids_at))
            .ok_or_else(|| PackError::corrupt("pack index object count overflows"))?;
        let offsets_at = crcs_at + n * 4;
        let large_offsets_at = offsets_at + n * 4;
        let fixed = large_offsets_at + TRAILER_LEN;

        if data.len() < fixed || (data.len() - fixed) % 8 != 0 {
            return Err(PackError::corrupt(format!(
                "v2 pack index is {} bytes, inconsistent with {} objects",
                data.len(),
                count
            )));
        }
        let large_count = (data.len() - fixed) / 8;
        let pack_checksum = check_trailer(&data)?;

        let index = Self {
            data,
            fanout,
            count,
            ids_at,
            crcs_at,
            offsets_at,
            large_offsets_at,
            large_count,
            pack_checksum,
        };
        validate_ids(&index.fanout, count, |rank| index.raw_id(rank))?;
        for rank in 0..count {
            let raw = index.raw_offset(rank);
            if raw & LARGE_OFFSET_FLAG != 0 {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
                if slot >= large_count {
                    return Err(PackError::corrupt(format!(
                        "pack index rank {} points past the 64-bit offset table",
                        rank
                    )));
                }
            }
        }
        Ok(index)
    }

    fn raw_id(&self, rank: u32) -> &[u8] {
        let at = self.ids_at + rank as usize * ObjectId::LEN;
        &self.data[at..at + ObjectId::LEN]
    }

    fn raw_offset(&self, rank: u32) -> u32 {
        read_u32(&self.data, self.offsets_at + rank as usize * 4).unwrap_or(0)
    }

    /// Number of entries in the 64-bit offset table.
    pub fn large_offset_count(&self) -> usize {
        self.large_count
    }
}

impl PackIndex for PackIndexV2 {
    fn version(&self) -> IndexVersion {
        IndexVersion::V2
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
        let raw = self.raw_offset(rank);
        if raw & LARGE_OFFSET_FLAG == 0 {
            return Some(u64::from(raw));
        }
        let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
        read_u64(&self.data, self.large_offsets_at + slot * 8)
    }

    fn crc32_at(&self, rank: u32) -> Result<Option<u32>> {
        if rank >= self.count {
            return Ok(None);
        }
        Ok(read_u32(&self.data, self.crcs_at + rank as usize * 4))
    }

    fn pack_checksum(&self) -> [u8; 20] {
        self.pack_checksum
    }
}

impl fmt::Debug for PackIndexV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackIndexV2")
            .field("objects", &self.count)
            .field("large_offsets", &self.large_count)
            .finish()
    }
}
