//! Object identity, types and in-memory object values.

use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte SHA-1 object identifier.
///
/// Ordering is the unsigned big-endian comparison of the raw bytes, which is
/// the order used by pack indexes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Length of an id in bytes.
    pub const LEN: usize = 20;

    /// Length of an id in hex characters.
    pub const HEX_LEN: usize = 40;

    /// Creates an ObjectId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from the first 20 bytes of `bytes`.
    ///
    /// Returns `None` if fewer than 20 bytes are available.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 20] = bytes.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Creates an ObjectId from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidObjectId(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObjectId(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the first byte, which selects the fan-out bucket.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Computes the id of an object: the SHA-1 of `"<type> <size>\0"`
    /// followed by the content.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let mut hasher = ObjectHasher::new(object_type, data.len() as u64);
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental object id computation for content that arrives in pieces.
pub struct ObjectHasher {
    hasher: Sha1,
}

impl ObjectHasher {
    /// Starts hashing an object whose content will be exactly `size` bytes.
    pub fn new(object_type: ObjectType, size: u64) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_header(object_type, size));
        Self { hasher }
    }

    /// Feeds more content into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finishes the digest and returns the id.
    pub fn finish(self) -> ObjectId {
        let result = self.hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        ObjectId(bytes)
    }
}

/// Returns the canonical `"<type> <size>\0"` header that prefixes object
/// content for hashing and loose storage.
pub fn object_header(object_type: ObjectType, size: u64) -> Vec<u8> {
    format!("{} {}\0", object_type.as_str(), size).into_bytes()
}

/// Git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
    /// Annotated tag.
    Tag,
}

impl ObjectType {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type from its header word.
    pub fn parse(s: &[u8]) -> Result<Self> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(StorageError::corrupt_data(format!(
                "unknown object type: {}",
                String::from_utf8_lossy(s)
            ))),
        }
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Maps a pack file type code to a whole-object type.
    ///
    /// Delta codes (6, 7) and the reserved codes return `None`.
    pub fn from_pack_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully materialized object (blob, tree, commit, or tag).
#[derive(Debug, Clone)]
pub struct RawObject {
    /// The object's unique identifier (SHA-1 hash).
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed, without header).
    pub data: Bytes,
}

impl RawObject {
    /// Creates a new object, computing its ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Wraps already-identified content without rehashing it.
    pub fn with_id(id: ObjectId, object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            object_type,
            data: data.into(),
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: ordering agrees with byte-slice ordering
        #[test]
        fn prop_ordering_matches_bytes(a in any::<[u8; 20]>(), b in any::<[u8; 20]>()) {
            let ia = ObjectId::from_bytes(a);
            let ib = ObjectId::from_bytes(b);
            prop_assert_eq!(ia.cmp(&ib), a.cmp(&b));
        }

        /// Property: hex encoding roundtrips
        #[test]
        fn prop_hex_roundtrip(a in any::<[u8; 20]>()) {
            let id = ObjectId::from_bytes(a);
            prop_assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        }
    }
}
