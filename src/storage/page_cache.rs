//! Fixed-capacity LRU cache of 4 KiB file pages with dirty tracking.
//!
//! Sits under [`super::file_store::RecordFile`]. Reads pull whole pages from
//! disk; writes land in cached pages and are marked dirty. Dirty pages are
//! written back on eviction and on [`PageCache::flush`]; the file store
//! flushes after every public write, so the cache never delays durability.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Page size in bytes. All cached I/O is aligned to this.
pub(crate) const PAGE_SIZE: usize = 4096;

struct Page {
    data: Box<[u8; PAGE_SIZE]>,
    /// Meaningful bytes in this page (the rest is past end-of-file).
    valid: usize,
    dirty: bool,
    last_used: u64,
}

pub(crate) struct PageCache {
    capacity: usize,
    tick: u64,
    pages: HashMap<u64, Page>,
}

impl PageCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            pages: HashMap::new(),
        }
    }

    /// Copy `buf.len()` bytes starting at raw offset `pos` into `buf`.
    /// The caller has already bounds-checked against the logical length;
    /// every prior write was flushed, so cached pages cover the range.
    pub(crate) fn read(&mut self, file: &mut File, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut copied = 0usize;
        while copied < buf.len() {
            let at = pos + copied as u64;
            let page_no = at / PAGE_SIZE as u64;
            let in_page = (at % PAGE_SIZE as u64) as usize;
            let take = (PAGE_SIZE - in_page).min(buf.len() - copied);
            let page = self.page(file, page_no)?;
            buf[copied..copied + take].copy_from_slice(&page.data[in_page..in_page + take]);
            copied += take;
        }
        Ok(())
    }

    /// Copy `bytes` into cached pages at raw offset `pos`, marking them
    /// dirty and extending their valid length past end-of-file appends.
    pub(crate) fn write(&mut self, file: &mut File, pos: u64, bytes: &[u8]) -> io::Result<()> {
        let mut copied = 0usize;
        while copied < bytes.len() {
            let at = pos + copied as u64;
            let page_no = at / PAGE_SIZE as u64;
            let in_page = (at % PAGE_SIZE as u64) as usize;
            let take = (PAGE_SIZE - in_page).min(bytes.len() - copied);
            let page = self.page(file, page_no)?;
            page.data[in_page..in_page + take].copy_from_slice(&bytes[copied..copied + take]);
            page.valid = page.valid.max(in_page + take);
            page.dirty = true;
            copied += take;
        }
        Ok(())
    }

    /// Write every dirty page back to the file and sync.
    pub(crate) fn flush(&mut self, file: &mut File) -> io::Result<()> {
        let mut dirty: Vec<u64> = self
            .pages
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(no, _)| *no)
            .collect();
        dirty.sort_unstable();
        for page_no in dirty {
            if let Some(page) = self.pages.get_mut(&page_no) {
                write_back(file, page_no, page)?;
                page.dirty = false;
            }
        }
        file.flush()
    }

    /// Fetch a page, loading it from disk on a miss and evicting the
    /// least-recently-used page when the cache is at capacity. The valid
    /// length comes from the file's real extent, so a page at end-of-file
    /// starts short and grows as writes land in it.
    fn page(&mut self, file: &mut File, page_no: u64) -> io::Result<&mut Page> {
        if !self.pages.contains_key(&page_no) {
            if self.pages.len() >= self.capacity {
                self.evict_lru(file)?;
            }
            let start = page_no * PAGE_SIZE as u64;
            let on_disk = file.metadata()?.len();
            let valid = on_disk.saturating_sub(start).min(PAGE_SIZE as u64) as usize;
            let mut data = Box::new([0u8; PAGE_SIZE]);
            if valid > 0 {
                file.seek(SeekFrom::Start(start))?;
                file.read_exact(&mut data[..valid])?;
            }
            self.pages.insert(
                page_no,
                Page {
                    data,
                    valid,
                    dirty: false,
                    last_used: 0,
                },
            );
        }
        self.tick += 1;
        let tick = self.tick;
        let page = self
            .pages
            .get_mut(&page_no)
            .ok_or_else(|| io::Error::other("page vanished from cache"))?;
        page.last_used = tick;
        Ok(page)
    }

    fn evict_lru(&mut self, file: &mut File) -> io::Result<()> {
        let victim = self
            .pages
            .iter()
            .min_by_key(|(_, p)| p.last_used)
            .map(|(no, _)| *no);
        if let Some(page_no) = victim {
            if let Some(mut page) = self.pages.remove(&page_no) {
                if page.dirty {
                    write_back(file, page_no, &mut page)?;
                }
            }
        }
        Ok(())
    }
}

/// Persist the valid prefix of one page. Writing only `valid` bytes keeps
/// the file length exact; records never gain zero padding.
fn write_back(file: &mut File, page_no: u64, page: &mut Page) -> io::Result<()> {
    if page.valid == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(page_no * PAGE_SIZE as u64))?;
    file.write_all(&page.data[..page.valid])
}
