//! # Page Cache with Pin Counting
//!
//! Pin-counted cache of pages read from the memory-mapped file. A pinned
//! page's bytes stay valid until the last pin is dropped; the verifier's
//! resource discipline (release on every exit path) falls out of the
//! [`PinnedPage`] RAII guard.
//!
//! ## Pin/Unpin Protocol
//!
//! 1. `pin(addr, size)` bounds-checks the extent, reads the page once, and
//!    returns a pinned reference (increments the pin count)
//! 2. The caller reads the page through the guard
//! 3. Dropping the guard decrements the pin count
//! 4. Entries with a nonzero pin count are never swept
//!
//! ## Relocation Retry
//!
//! A writer that rewrites a page invalidates the address the reader was
//! about to use; the cache surfaces this as [`PinOutcome::Retry`] rather
//! than an error. The caller re-pins with the reference it read from its
//! still-pinned parent, which by then carries the updated address. Against
//! a quiescent file the signal never fires; `mark_relocated` exists so the
//! retry path can be exercised deliberately.
//!
//! ## Sweeping
//!
//! The cache never evicts on read; once the table grows past a threshold,
//! unpinned entries are dropped wholesale. Pages are re-read from the map
//! if they are visited again, which for verification never happens on a
//! well-formed tree (the coverage bitmap rejects double visits first).

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;
use zerocopy::FromBytes;

use crate::btree::PageHeader;
use crate::config::{PAGE_CACHE_SWEEP_THRESHOLD, PAGE_HEADER_SIZE};
use crate::storage::MmapFile;

/// One page's bytes, with the fixed header parsed out at read time.
#[derive(Debug)]
pub struct PageBuf {
    addr: u32,
    size: u32,
    header: PageHeader,
    data: Box<[u8]>,
}

impl PageBuf {
    pub(crate) fn from_bytes(addr: u32, size: u32, data: Box<[u8]>) -> Result<Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "page at addr {} is smaller than the page header",
            addr
        );
        let header = PageHeader::read_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read page header at addr {}: {:?}", addr, e))?;
        Ok(Self {
            addr,
            size,
            header,
            data,
        })
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    /// Full page bytes, header included. Item offsets are relative to this.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Page bytes past the fixed header.
    pub fn body(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }
}

struct CacheEntry {
    page: PageBuf,
    pin_count: AtomicU32,
    relocated: AtomicBool,
}

/// Outcome of a pin attempt: the page, or a request to re-pin with the
/// caller's (updated) reference.
pub enum PinOutcome {
    Pinned(PinnedPage),
    Retry,
}

/// RAII pin on a cached page; unpins on drop.
pub struct PinnedPage {
    entry: Arc<CacheEntry>,
}

impl Deref for PinnedPage {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        &self.entry.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        let prev = self.entry.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned page");
    }
}

impl std::fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("addr", &self.entry.page.addr())
            .field("size", &self.entry.page.size())
            .finish()
    }
}

pub struct PageCache {
    file: Arc<MmapFile>,
    alloc_unit: u32,
    table: Mutex<HashMap<u32, Arc<CacheEntry>>>,
}

impl PageCache {
    pub fn new(file: Arc<MmapFile>, alloc_unit: u32) -> Self {
        Self {
            file,
            alloc_unit,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Pins the page at `(addr, size)`, reading it from the file on first
    /// use. Returns `Retry` when the page was marked relocated since it was
    /// last seen.
    pub fn pin(&self, addr: u32, size: u32) -> Result<PinOutcome> {
        ensure!(size > 0, "page at addr {} pinned with a zero size", addr);
        ensure!(
            size % self.alloc_unit == 0,
            "page at addr {} pinned with size {} not a multiple of the {}-byte allocation unit",
            addr,
            size,
            self.alloc_unit
        );

        let offset = addr as u64 * self.alloc_unit as u64;
        let mut table = self.table.lock();

        if let Some(entry) = table.get(&addr) {
            if entry.relocated.swap(false, Ordering::AcqRel) {
                trace!(addr, "page marked relocated; asking caller to re-pin");
                return Ok(PinOutcome::Retry);
            }
            if entry.page.size() == size {
                entry.pin_count.fetch_add(1, Ordering::AcqRel);
                return Ok(PinOutcome::Pinned(PinnedPage {
                    entry: Arc::clone(entry),
                }));
            }
            ensure!(
                entry.pin_count.load(Ordering::Acquire) == 0,
                "page at addr {} re-referenced with size {} while pinned with size {}",
                addr,
                size,
                entry.page.size()
            );
            table.remove(&addr);
        }

        if table.len() >= PAGE_CACHE_SWEEP_THRESHOLD {
            let before = table.len();
            table.retain(|_, e| e.pin_count.load(Ordering::Acquire) > 0);
            trace!(swept = before - table.len(), "page cache sweep");
        }

        let bytes = self.file.slice(offset, size as usize)?;
        let page = PageBuf::from_bytes(addr, size, bytes.to_vec().into_boxed_slice())?;
        let entry = Arc::new(CacheEntry {
            page,
            pin_count: AtomicU32::new(1),
            relocated: AtomicBool::new(false),
        });
        table.insert(addr, Arc::clone(&entry));
        Ok(PinOutcome::Pinned(PinnedPage { entry }))
    }

    /// Marks a cached page relocated so that the next pin attempt observes
    /// `Retry` once. Used to exercise the re-pin path; a quiescent file
    /// never trips it.
    pub fn mark_relocated(&self, addr: u32) {
        if let Some(entry) = self.table.lock().get(&addr) {
            entry.relocated.store(true, Ordering::Release);
        }
    }
}
