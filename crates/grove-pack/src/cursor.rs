//! Positioned reads over a windowed file.
//!
//! A cursor holds on to the last window it used so sequential reads inside
//! one window do not go back to the cache.

use crate::cache::WindowCache;
use crate::window::{Window, WindowedFile};
use crate::{PackError, Result};
use flate2::bufread::ZlibDecoder;
use std::io::{self, BufRead, Read};
use std::sync::Arc;

/// Upper bound on the buffer reserved up front for an inflated object.
const MAX_PREALLOC: usize = 1 << 20;

/// Reads bytes of one file through a [`WindowCache`].
pub struct WindowCursor<'a> {
    cache: &'a WindowCache,
    file: &'a WindowedFile,
    window: Option<Arc<Window>>,
}

impl<'a> WindowCursor<'a> {
    /// Creates a cursor over `file`.
    pub fn new(cache: &'a WindowCache, file: &'a WindowedFile) -> Self {
        Self {
            cache,
            file,
            window: None,
        }
    }

    fn window_at(&mut self, position: u64) -> Result<&Arc<Window>> {
        let current = self.window.take().filter(|w| w.contains(position));
        let window = match current {
            Some(window) => window,
            None => self.cache.get(self.file, position)?,
        };
        Ok(&*self.window.insert(window))
    }

    /// Copies bytes starting at `position` into `buf`, crossing window
    /// boundaries as needed. Returns how many bytes were copied, which is
    /// less than `buf.len()` only at the end of the file.
    pub fn copy(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            let pos = position + copied as u64;
            if pos >= self.file.len() {
                break;
            }
            let tail = self.window_at(pos)?.tail(pos);
            let n = tail.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&tail[..n]);
            copied += n;
        }
        Ok(copied)
    }

    /// Fills `buf` from `position` or fails with a corruption error.
    pub fn read_exact(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.copy(position, buf)?;
        if n < buf.len() {
            return Err(PackError::corrupt(format!(
                "unexpected end of {} reading {} bytes at {}",
                self.file.path().display(),
                buf.len(),
                position
            )));
        }
        Ok(())
    }

    /// Inflates a zlib stream starting at `position` that must produce
    /// exactly `size` bytes.
    pub fn inflate(&mut self, position: u64, size: u64) -> Result<Vec<u8>> {
        let expected = usize::try_from(size)
            .map_err(|_| PackError::corrupt(format!("object size {} does not fit memory", size)))?;
        let reader = WindowReader {
            cursor: WindowCursor {
                cache: self.cache,
                file: self.file,
                window: self.window.take(),
            },
            position,
            error: None,
        };
        let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC));
        let mut limited = ZlibDecoder::new(reader).take(size.saturating_add(1));
        let outcome = limited.read_to_end(&mut out);
        let mut reader = limited.into_inner().into_inner();
        self.window = reader.cursor.window.take();

        if let Some(err) = reader.error.take() {
            return Err(err);
        }
        if let Err(e) = outcome {
            return Err(PackError::corrupt(format!(
                "inflate failed at {}: {}",
                position, e
            )));
        }
        if out.len() != expected {
            return Err(PackError::corrupt(format!(
                "inflated {} bytes at {}, header declared {}",
                out.len(),
                position,
                size
            )));
        }
        Ok(out)
    }
}

/// Sequential [`BufRead`] adapter over a cursor.
///
/// Cache errors cannot travel through `io::Error` intact, so the first one is
/// kept and surfaced by the caller after the read fails.
struct WindowReader<'a> {
    cursor: WindowCursor<'a>,
    position: u64,
    error: Option<PackError>,
}

impl Read for WindowReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for WindowReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let position = self.position;
        if position >= self.cursor.file.len() {
            return Ok(&[]);
        }
        match self.cursor.window_at(position) {
            Ok(_) => {}
            Err(e) => {
                let message = e.to_string();
                self.error.get_or_insert(e);
                return Err(io::Error::other(message));
            }
        }
        match &self.cursor.window {
            Some(window) => Ok(window.tail(position)),
            None => Ok(&[]),
        }
    }

    fn consume(&mut self, amt: usize) {
        self.position += amt as u64;
    }
}
