//! Fixed-size windows of pack data and the file handles they are loaded from.

use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Identifies one open file inside a window cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) u64);

/// Cache key of a window: which file, and which aligned slot in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WindowKey {
    pub(crate) file: FileId,
    pub(crate) window: u64,
}

enum WindowData {
    Heap(Bytes),
    Mapped(Mmap),
}

/// An immutable byte range loaded from one file at one aligned offset.
pub struct Window {
    file: FileId,
    id: u64,
    start: u64,
    data: WindowData,
}

impl Window {
    /// File this window belongs to.
    pub fn file(&self) -> FileId {
        self.file
    }

    /// Window number within the file (`start >> log2(window size)`).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// File offset of the first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// File offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.len() as u64
    }

    /// Returns true if `position` falls inside this window.
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position < self.end()
    }

    /// The window's bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            WindowData::Heap(bytes) => bytes.as_ref(),
            WindowData::Mapped(map) => &map[..],
        }
    }

    /// Bytes from `position` to the end of the window.
    ///
    /// Returns an empty slice if `position` is outside the window.
    pub fn tail(&self, position: u64) -> &[u8] {
        if !self.contains(position) {
            return &[];
        }
        &self.bytes()[(position - self.start) as usize..]
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Returns true for an empty window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the bytes are memory-mapped.
    pub fn is_mapped(&self) -> bool {
        matches!(self.data, WindowData::Mapped(_))
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("file", &self.file)
            .field("id", &self.id)
            .field("start", &self.start)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// A read-only file served through the window cache.
///
/// The handle's seek position is shared state, so every positioned read goes
/// through [`WindowedFile::load`], which holds the file lock for the
/// seek + read pair.
pub struct WindowedFile {
    id: FileId,
    path: PathBuf,
    file: Mutex<File>,
    length: u64,
}

impl WindowedFile {
    pub(crate) fn open(id: FileId, path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            length,
        })
    }

    /// Cache identity of this file.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length in bytes, captured at open.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Returns true for an empty file.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Loads window `window_id`: up to `window_size` bytes starting at
    /// `window_id << shift`. The last window of a file may be shorter.
    pub(crate) fn load(
        &self,
        window_id: u64,
        window_size: usize,
        shift: u32,
        memory_map: bool,
    ) -> io::Result<Window> {
        let start = window_id << shift;
        if start >= self.length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "window {} starts past the end of {} ({} bytes)",
                    window_id,
                    self.path.display(),
                    self.length
                ),
            ));
        }
        let len = (self.length - start).min(window_size as u64) as usize;

        let data = if memory_map {
            let file = self.file.lock();
            // SAFETY: pack files are immutable once written; the map is
            // read-only and never outlives the window that owns it.
            let map = unsafe { MmapOptions::new().offset(start).len(len).map(&*file)? };
            WindowData::Mapped(map)
        } else {
            let mut buf = vec![0u8; len];
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut buf)?;
            WindowData::Heap(Bytes::from(buf))
        };

        Ok(Window {
            file: self.id,
            id: window_id,
            start,
            data,
        })
    }
}

impl fmt::Debug for WindowedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("length", &self.length)
            .finish()
    }
}
