//! Per-object entry headers inside a pack.

use crate::{PackError, Result};
use grove_storage::{ObjectId, ObjectType};
use std::fmt;

/// Longest entry header: a 10-byte size varint, a 10-byte base offset
/// varint or a 20-byte base id, rounded up.
pub const MAX_HEADER_LEN: usize = 32;

/// Pack type code of an offset delta entry.
pub const OFS_DELTA: u8 = 6;
/// Pack type code of a reference delta entry.
pub const REF_DELTA: u8 = 7;

/// How an entry's body is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedObjectKind {
    /// The body inflates to the object itself.
    Whole(ObjectType),
    /// The body is a delta against the object `base_distance` bytes before
    /// this entry's header in the same pack.
    OffsetDelta {
        /// Distance back from this entry's header to the base's header.
        base_distance: u64,
    },
    /// The body is a delta against the object with id `base_id`, which may
    /// live outside this pack.
    RefDelta {
        /// Id of the base object.
        base_id: ObjectId,
    },
}

impl PackedObjectKind {
    /// Returns true for either delta form.
    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Whole(_))
    }
}

impl fmt::Display for PackedObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(t) => write!(f, "{}", t),
            Self::OffsetDelta { base_distance } => write!(f, "ofs-delta(-{})", base_distance),
            Self::RefDelta { base_id } => write!(f, "ref-delta({})", base_id),
        }
    }
}

/// A decoded entry header: where the entry lives, how its body is stored
/// and how many bytes the body inflates to.
///
/// For delta entries `size` is the length of the delta instruction stream,
/// not of the final object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedObjectLoader {
    header_offset: u64,
    data_offset: u64,
    size: u64,
    kind: PackedObjectKind,
}

impl PackedObjectLoader {
    /// Offset of the entry header.
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Offset of the zlib body, just past the header.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Declared inflated size of the body.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Storage form.
    pub fn kind(&self) -> PackedObjectKind {
        self.kind
    }

    /// Header offset of the base entry for offset deltas.
    pub fn base_offset(&self) -> Option<u64> {
        match self.kind {
            PackedObjectKind::OffsetDelta { base_distance } => {
                Some(self.header_offset - base_distance)
            }
            _ => None,
        }
    }

    /// Object type for whole entries.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self.kind {
            PackedObjectKind::Whole(t) => Some(t),
            _ => None,
        }
    }
}

/// Decodes the entry header at the start of `buf`, which was read from
/// `header_offset`. `buf` may extend past the header.
pub fn decode_object_header(buf: &[u8], header_offset: u64) -> Result<PackedObjectLoader> {
    let truncated = || {
        PackError::corrupt(format!(
            "truncated object header at pack offset {}",
            header_offset
        ))
    };

    let mut pos = 0;
    let mut byte = *buf.get(pos).ok_or_else(truncated)?;
    pos += 1;
    let type_code = (byte >> 4) & 0x07;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        byte = *buf.get(pos).ok_or_else(truncated)?;
        pos += 1;
        let bits = u64::from(byte & 0x7f);
        if shift > 63 || (bits << shift) >> shift != bits {
            return Err(PackError::corrupt(format!(
                "object size overflows at pack offset {}",
                header_offset
            )));
        }
        size |= bits << shift;
        shift += 7;
    }

    let kind = match type_code {
        OFS_DELTA => {
            let mut c = *buf.get(pos).ok_or_else(truncated)?;
            pos += 1;
            let mut distance = u64::from(c & 0x7f);
            while c & 0x80 != 0 {
                c = *buf.get(pos).ok_or_else(truncated)?;
                pos += 1;
                distance = distance
                    .checked_add(1)
                    .and_then(|d| d.checked_mul(128))
                    .map(|d| d | u64::from(c & 0x7f))
                    .ok_or_else(|| {
                        PackError::corrupt(format!(
                            "delta base offset overflows at pack offset {}",
                            header_offset
                        ))
                    })?;
            }
            if distance == 0 || distance > header_offset {
                return Err(PackError::corrupt(format!(
                    "delta base {} bytes before pack offset {} is outside the pack",
                    distance, header_offset
                )));
            }
            PackedObjectKind::OffsetDelta {
                base_distance: distance,
            }
        }
        REF_DELTA => {
            let base_id = buf
                .get(pos..pos + ObjectId::LEN)
                .and_then(ObjectId::from_slice)
                .ok_or_else(truncated)?;
            pos += ObjectId::LEN;
            PackedObjectKind::RefDelta { base_id }
        }
        code => match ObjectType::from_pack_type(code) {
            Some(t) => PackedObjectKind::Whole(t),
            None => {
                return Err(PackError::corrupt(format!(
                    "invalid object type {} at pack offset {}",
                    code, header_offset
                )))
            }
        },
    };

    let data_offset = header_offset
        .checked_add(pos as u64)
        .ok_or_else(truncated)?;
    Ok(PackedObjectLoader {
        header_offset,
        data_offset,
        size,
        kind,
    })
}

#[cfg(test)]
pub(crate) fn encode_object_header(type_code: u8, size: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

#[cfg(test)]
pub(crate) fn encode_base_distance(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.push(0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    out.reverse();
    out
}
