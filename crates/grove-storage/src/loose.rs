//! Loose object storage.
//!
//! Each object lives in its own zlib-compressed file holding
//! `"<type> <size>\0<content>"`. The file path is derived from the id: the
//! first byte in hex names a directory and the remaining 38 hex characters
//! name the file.
//!
//! Writes stream content through the digest and the compressor at the same
//! time into a temp file next to the objects, then rename it into place.
//! Identical content always converges on one file: if the destination
//! already exists the temp file is discarded.

use crate::compression::{CompressionLevel, LooseStats, LooseStatsSnapshot};
use crate::object::{object_header, ObjectHasher};
use crate::traits::ObjectLoader;
use crate::{ObjectId, ObjectType, RawObject, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Longest header accepted before the NUL (`"commit 18446744073709551615"`
/// is 27 bytes).
const MAX_HEADER_LEN: usize = 32;

/// Configuration for the loose object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooseStoreConfig {
    /// Compression level for newly written objects.
    pub compression: CompressionLevel,
    /// Whether to fsync object files before renaming them into place.
    pub fsync: bool,
}

impl Default for LooseStoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::Default,
            fsync: false,
        }
    }
}

/// Store of individually compressed objects under one directory.
#[derive(Debug)]
pub struct LooseObjectStore {
    root: PathBuf,
    config: LooseStoreConfig,
    stats: LooseStats,
}

impl LooseObjectStore {
    /// Creates a store rooted at `root` (usually `.git/objects`).
    ///
    /// The directory is created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>, config: LooseStoreConfig) -> Self {
        Self {
            root: root.into(),
            config,
            stats: LooseStats::default(),
        }
    }

    /// Creates a store with default configuration.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        Self::new(root, LooseStoreConfig::default())
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns read and write counters for this store.
    pub fn stats(&self) -> LooseStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the path where `id` is (or would be) stored.
    pub fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Checks if an object exists without reading it.
    pub fn has(&self, id: &ObjectId) -> bool {
        self.path_for(id).is_file()
    }

    /// Reads and inflates an object.
    pub fn read(&self, id: &ObjectId) -> Result<RawObject> {
        let path = self.path_for(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::MissingObject(*id));
            }
            Err(e) => return Err(e.into()),
        };

        let mut inflated = Vec::new();
        ZlibDecoder::new(BufReader::new(file))
            .read_to_end(&mut inflated)
            .map_err(|e| StorageError::corrupt(*id, format!("inflate failed: {}", e)))?;
        self.stats.record_read();

        let (object_type, size, header_len) =
            parse_header(&inflated).map_err(|reason| StorageError::corrupt(*id, reason))?;
        let body_len = (inflated.len() - header_len) as u64;
        if body_len != size {
            return Err(StorageError::corrupt(
                *id,
                format!("header declares {} bytes, found {}", size, body_len),
            ));
        }

        trace!(id = %id, kind = %object_type, size, "read loose object");
        let data = Bytes::from(inflated).slice(header_len..);
        Ok(RawObject::with_id(*id, object_type, data))
    }

    /// Writes an object and returns its id.
    pub fn write(&self, object_type: ObjectType, data: &[u8]) -> Result<ObjectId> {
        self.write_stream(object_type, data.len() as u64, data)
    }

    /// Writes an object whose `size` bytes of content are read from `reader`.
    ///
    /// The reader must yield exactly `size` bytes.
    pub fn write_stream<R: Read>(
        &self,
        object_type: ObjectType,
        size: u64,
        mut reader: R,
    ) -> Result<ObjectId> {
        fs::create_dir_all(&self.root).map_err(|source| write_failure(&self.root, source))?;
        let temp = tempfile::Builder::new()
            .prefix("tmp_obj_")
            .tempfile_in(&self.root)
            .map_err(|source| write_failure(&self.root, source))?;
        let temp_path = temp.path().to_path_buf();
        let fail = |source: io::Error| write_failure(&temp_path, source);

        let mut hasher = ObjectHasher::new(object_type, size);
        let mut encoder = ZlibEncoder::new(temp, self.config.compression.to_flate2());
        encoder
            .write_all(&object_header(object_type, size))
            .map_err(fail)?;

        let mut buf = [0u8; 8192];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            written += n as u64;
            if written > size {
                break;
            }
            hasher.update(&buf[..n]);
            encoder.write_all(&buf[..n]).map_err(fail)?;
        }
        if written != size {
            return Err(fail(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected {} bytes of content, got {}", size, written),
            )));
        }

        let temp = encoder.finish().map_err(fail)?;
        let compressed_len = temp.as_file().metadata().map_err(fail)?.len();
        if self.config.fsync {
            temp.as_file().sync_all().map_err(fail)?;
        }

        let id = hasher.finish();
        let dest = self.path_for(&id);
        let duplicate = dest.is_file();
        self.stats.record_write(size, compressed_len, duplicate);
        if duplicate {
            // Dropping the temp file deletes it.
            debug!(id = %id, "object already stored, discarding temp file");
            return Ok(id);
        }
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).map_err(|source| write_failure(dir, source))?;
        }
        temp.persist(&dest)
            .map_err(|e| write_failure(&dest, e.error))?;

        debug!(id = %id, kind = %object_type, size, "wrote loose object");
        Ok(id)
    }

    /// Lists the ids of all loose objects.
    pub fn list_objects(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let dir_name = entry.file_name();
            let Some(prefix) = dir_name.to_str() else {
                continue;
            };
            if prefix.len() != 2 || !entry.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let name = file.file_name();
                let Some(rest) = name.to_str() else {
                    continue;
                };
                if rest.len() != ObjectId::HEX_LEN - 2 {
                    continue;
                }
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", prefix, rest)) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ObjectLoader for LooseObjectStore {
    type Error = StorageError;

    fn open(&self, id: &ObjectId) -> Result<RawObject> {
        self.read(id)
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(LooseObjectStore::has(self, id))
    }
}

fn write_failure(path: &Path, source: io::Error) -> StorageError {
    StorageError::ObjectWriteFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Parses `"<word> <decimal>\0"` at the start of an inflated loose object.
///
/// Returns the type, declared size and header length including the NUL.
fn parse_header(buf: &[u8]) -> std::result::Result<(ObjectType, u64, usize), String> {
    let window = &buf[..buf.len().min(MAX_HEADER_LEN)];
    let nul = window
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| "missing NUL after header".to_string())?;
    let header = &window[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| "missing space in header".to_string())?;

    let object_type = ObjectType::parse(&header[..space]).map_err(|e| e.to_string())?;
    let digits = &header[space + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(format!(
            "invalid size in header: {:?}",
            String::from_utf8_lossy(digits)
        ));
    }
    let size = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| "size in header overflows".to_string())?;
    Ok((object_type, size, nul + 1))
}
