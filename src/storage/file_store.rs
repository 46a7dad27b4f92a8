//! Byte-addressable record file with a file-wide mutex.
//!
//! One [`RecordFile`] per record type. Supports atomic append, random read,
//! and in-place overwrite of fixed-width records. Offsets handed out are
//! shifted by +1 so the stored value `0` always means "none"; the shift
//! lives inside [`DiskOffset`] and never leaks into callers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::page_cache::PageCache;
use crate::error::StorageError;

/// Stable identity of a record on disk.
///
/// Carries the raw byte offset shifted by +1, so the "none" case is
/// unrepresentable by construction; persisted sidecars store the shifted
/// value and use `0` as the absent sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskOffset(NonZeroU64);

impl DiskOffset {
    /// Wrap a raw byte offset.
    pub(crate) fn from_raw(raw: u64) -> Self {
        // raw + 1 is never zero; saturating keeps the expression total.
        Self(NonZeroU64::new(raw.saturating_add(1)).unwrap_or(NonZeroU64::MIN))
    }

    /// Decode a stored (shifted) value; `0` is "none".
    pub(crate) fn from_stored(stored: u64) -> Option<Self> {
        NonZeroU64::new(stored).map(Self)
    }

    /// The shifted form written to sidecar files.
    pub(crate) fn stored(self) -> u64 {
        self.0.get()
    }

    /// The raw byte offset into the data file.
    pub(crate) fn raw(self) -> u64 {
        self.0.get() - 1
    }
}

struct Inner {
    file: File,
    len: u64,
    cache: Option<PageCache>,
}

/// Append/read/overwrite access to one data file, serialized by a mutex.
pub struct RecordFile {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl RecordFile {
    /// Open (creating if absent) without a page cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Open (creating if absent) with an LRU page cache of `pages` pages.
    pub fn open_cached(path: impl AsRef<Path>, pages: usize) -> Result<Self, StorageError> {
        Self::open_inner(path.as_ref(), Some(PageCache::new(pages)))
    }

    fn open_inner(path: &Path, cache: Option<PageCache>) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, len, cache }),
        })
    }

    /// Path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and return its offset. Durable on return.
    pub fn append(&self, bytes: &[u8]) -> Result<DiskOffset, StorageError> {
        let mut inner = self.inner.lock().expect("lock");
        let raw = inner.len;
        inner.write_range(raw, bytes)?;
        inner.len = raw + bytes.len() as u64;
        Ok(DiskOffset::from_raw(raw))
    }

    /// Read exactly `buf.len()` bytes at `offset`. Fails on a read past
    /// end-of-file instead of returning short data.
    pub fn read_at(&self, offset: DiskOffset, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("lock");
        let raw = offset.raw();
        let end = raw + buf.len() as u64;
        if end > inner.len {
            return Err(StorageError::TruncatedRecord {
                offset: raw,
                wanted: buf.len(),
                len: inner.len,
            });
        }
        inner.read_range(raw, buf)?;
        Ok(())
    }

    /// Overwrite bytes at an existing offset. The write must stay within
    /// the current file extent. Durable on return.
    pub fn write_at(&self, offset: DiskOffset, bytes: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("lock");
        let raw = offset.raw();
        let end = raw + bytes.len() as u64;
        if end > inner.len {
            return Err(StorageError::OffsetOutOfBounds {
                offset: raw,
                len: inner.len,
            });
        }
        inner.write_range(raw, bytes)?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().expect("lock").len
    }

    /// Whether the file holds no records yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn read_range(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if let Some(cache) = self.cache.as_mut() {
            cache.read(&mut self.file, pos, buf)?;
        } else {
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.read_exact(buf)?;
        }
        Ok(())
    }

    /// Write and flush, so the bytes are durable when this returns.
    fn write_range(&mut self, pos: u64, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(cache) = self.cache.as_mut() {
            cache.write(&mut self.file, pos, bytes)?;
            cache.flush(&mut self.file)?;
        } else {
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.write_all(bytes)?;
            self.file.flush()?;
        }
        Ok(())
    }
}
