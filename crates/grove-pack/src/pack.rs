//! Git pack file access.
//!
//! A pack is `"PACK"`, a version, an object count, the object entries and a
//! trailing SHA-1 of everything before it. Entries are found through the
//! sibling `.idx` file and read through the shared window cache.
//!
//! See: https://git-scm.com/docs/pack-format

use crate::cache::WindowCache;
use crate::cursor::WindowCursor;
use crate::index::{read_index, PackIndex};
use crate::loader::{decode_object_header, PackedObjectLoader, MAX_HEADER_LEN};
use crate::reverse::PackReverseIndex;
use crate::window::{FileId, WindowedFile};
use crate::{PackError, Result};
use grove_storage::ObjectId;
use once_cell::sync::OnceCell;
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Signature, version and object count.
pub const PACK_HEADER_LEN: u64 = 12;
/// Trailing SHA-1 of the pack contents.
pub const PACK_TRAILER_LEN: u64 = 20;

/// Decoded fixed header of a pack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    /// Format version, 2 or 3.
    pub version: u32,
    /// Number of entries the pack claims to hold.
    pub object_count: u32,
}

/// An open pack file with its index.
///
/// Dropping the pack purges its windows from the cache.
pub struct PackFile {
    pack_path: PathBuf,
    index_path: PathBuf,
    cache: Arc<WindowCache>,
    file: WindowedFile,
    index: Arc<dyn PackIndex>,
    reverse: OnceCell<PackReverseIndex>,
    header: PackHeader,
}

impl PackFile {
    /// Opens `pack_path` and its sibling `.idx`.
    ///
    /// Fails with `CorruptObject` if the pack header is malformed or its
    /// object count disagrees with the index.
    pub fn open(pack_path: &Path, cache: Arc<WindowCache>) -> Result<Self> {
        let index_path = pack_path.with_extension("idx");
        let index = read_index(&index_path)?;
        let file = cache.open_file(pack_path)?;
        let mut pack = Self {
            pack_path: pack_path.to_path_buf(),
            index_path,
            cache,
            file,
            index,
            reverse: OnceCell::new(),
            header: PackHeader {
                version: 0,
                object_count: 0,
            },
        };
        pack.header = pack.read_header()?;
        debug!(
            pack = %pack.pack_path.display(),
            version = pack.header.version,
            objects = pack.header.object_count,
            bytes = pack.file.len(),
            "opened pack"
        );
        Ok(pack)
    }

    /// Reads and validates the fixed pack header against the index.
    pub fn read_header(&self) -> Result<PackHeader> {
        if self.file.len() < PACK_HEADER_LEN + PACK_TRAILER_LEN {
            return Err(self.corrupt(format!("pack is only {} bytes", self.file.len())));
        }
        let mut buf = [0u8; PACK_HEADER_LEN as usize];
        self.cursor().read_exact(0, &mut buf)?;
        if &buf[..4] != PACK_SIGNATURE {
            return Err(self.corrupt("invalid pack signature"));
        }
        let version = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != 2 && version != 3 {
            return Err(self.corrupt(format!("unsupported pack version {}", version)));
        }
        let object_count = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if object_count != self.index.object_count() {
            return Err(self.corrupt(format!(
                "pack holds {} objects but its index lists {}",
                object_count,
                self.index.object_count()
            )));
        }
        Ok(PackHeader {
            version,
            object_count,
        })
    }

    /// Path of the `.pack` file.
    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    /// Path of the `.idx` file.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Cache identity of the pack file.
    pub fn file_id(&self) -> FileId {
        self.file.id()
    }

    /// Pack format version.
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Number of objects in the pack.
    pub fn object_count(&self) -> u32 {
        self.header.object_count
    }

    /// Length of the pack file in bytes.
    pub fn len(&self) -> u64 {
        self.file.len()
    }

    /// Returns true if the pack holds no objects.
    pub fn is_empty(&self) -> bool {
        self.header.object_count == 0
    }

    /// The pack's index.
    pub fn index(&self) -> &Arc<dyn PackIndex> {
        &self.index
    }

    /// Returns true if the index lists `id`.
    pub fn has(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Offset of `id`'s entry.
    pub fn find_offset(&self, id: &ObjectId) -> Option<u64> {
        self.index.find_offset(id)
    }

    /// Decodes the entry header of `id`, `None` if the pack does not hold it.
    pub fn get(&self, id: &ObjectId) -> Result<Option<PackedObjectLoader>> {
        match self.index.find_offset(id) {
            Some(offset) => self.loader_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes the entry header at `offset`.
    pub fn loader_at(&self, offset: u64) -> Result<PackedObjectLoader> {
        if offset < PACK_HEADER_LEN || offset >= self.data_end() {
            return Err(self.corrupt(format!("entry offset {} is outside the pack body", offset)));
        }
        let mut buf = [0u8; MAX_HEADER_LEN];
        let n = self.cursor().copy(offset, &mut buf)?;
        decode_object_header(&buf[..n], offset)
    }

    /// The reverse index, built on first use.
    pub fn reverse_index(&self) -> Result<&PackReverseIndex> {
        self.reverse.get_or_try_init(|| {
            debug!(pack = %self.pack_path.display(), "building reverse index");
            PackReverseIndex::build(self.index.clone())
        })
    }

    /// Offset one past the last byte of the entry at `offset`.
    pub fn find_end_offset(&self, offset: u64) -> Result<u64> {
        self.reverse_index()?
            .find_next_offset(offset, self.data_end())
    }

    /// Inflates the body of an entry.
    ///
    /// For delta entries this yields the delta instructions, not the object.
    pub fn inflate(&self, loader: &PackedObjectLoader) -> Result<Vec<u8>> {
        self.cursor()
            .inflate(loader.data_offset(), loader.size())
            .map_err(|e| self.with_object(e, loader.header_offset()))
    }

    /// The exact on-disk bytes of `id`'s entry, header included.
    pub fn raw_entry(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let offset = self
            .find_offset(id)
            .ok_or(PackError::MissingObject(*id))?;
        self.raw_entry_at(offset)
    }

    fn raw_entry_at(&self, offset: u64) -> Result<Vec<u8>> {
        let end = self.find_end_offset(offset)?;
        let len = usize::try_from(end - offset)
            .map_err(|_| self.corrupt(format!("entry at {} does not fit memory", offset)))?;
        let mut buf = vec![0u8; len];
        self.cursor().read_exact(offset, &mut buf)?;
        Ok(buf)
    }

    /// Checks the raw bytes of `id`'s entry against the CRC32 in the index.
    ///
    /// Version 1 indexes record no CRCs and fail with `Unsupported`.
    pub fn verify_crc32(&self, id: &ObjectId) -> Result<()> {
        let expected = self
            .index
            .find_crc32(id)?
            .ok_or(PackError::MissingObject(*id))?;
        let raw = self.raw_entry(id)?;
        let actual = crc32fast::hash(&raw);
        if actual != expected {
            warn!(pack = %self.pack_path.display(), object = %id, "CRC32 mismatch");
            return Err(PackError::corrupt_object(
                *id,
                format!("CRC32 {:08x} does not match index {:08x}", actual, expected),
            ));
        }
        Ok(())
    }

    /// Hashes the pack body and compares it with the trailer and with the
    /// checksum recorded in the index. Returns the checksum.
    pub fn verify_checksum(&self) -> Result<[u8; 20]> {
        let end = self.data_end();
        let mut cursor = self.cursor();
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; self.cache.window_size()];
        let mut pos = 0;
        while pos < end {
            let want = ((end - pos) as usize).min(buf.len());
            cursor.read_exact(pos, &mut buf[..want])?;
            hasher.update(&buf[..want]);
            pos += want as u64;
        }
        let mut computed = [0u8; 20];
        computed.copy_from_slice(&hasher.finalize());

        let mut trailer = [0u8; 20];
        cursor.read_exact(end, &mut trailer)?;
        if computed != trailer {
            warn!(pack = %self.pack_path.display(), "pack checksum mismatch");
            return Err(self.corrupt("pack checksum does not match its trailer"));
        }
        if computed != self.index.pack_checksum() {
            return Err(self.corrupt("pack checksum does not match its index"));
        }
        Ok(computed)
    }

    /// Offset of the trailer, which is where entry data ends.
    fn data_end(&self) -> u64 {
        self.file.len().saturating_sub(PACK_TRAILER_LEN)
    }

    fn cursor(&self) -> WindowCursor<'_> {
        WindowCursor::new(&self.cache, &self.file)
    }

    fn corrupt(&self, reason: impl fmt::Display) -> PackError {
        PackError::corrupt(format!("{}: {}", self.pack_path.display(), reason))
    }

    /// Attaches the object id at `offset`, when known, to a corruption error.
    fn with_object(&self, err: PackError, offset: u64) -> PackError {
        match err {
            PackError::CorruptObject { id: None, reason } => {
                let id = self
                    .reverse_index()
                    .ok()
                    .and_then(|rev| rev.find_object(offset));
                PackError::CorruptObject { id, reason }
            }
            other => other,
        }
    }
}

impl Drop for PackFile {
    fn drop(&mut self) {
        self.cache.purge(self.file.id());
    }
}

impl fmt::Debug for PackFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackFile")
            .field("path", &self.pack_path)
            .field("header", &self.header)
            .field("index", &self.index)
            .finish()
    }
}
