//! # Storage Module
//!
//! Read-only storage layer under the verifier: a memory-mapped view of the
//! database file plus a pin-counted page cache on top of it.
//!
//! ## Module Organization
//!
//! - `mmap`: low-level memory-mapped file handle (`MmapFile`)
//! - `cache`: pin/unpin page cache with the relocation retry protocol
//!
//! ## Addressing
//!
//! The storage layer speaks `(address, size)` pairs where the address is an
//! allocation-unit index and the size is a byte length that is a whole
//! multiple of the unit. Neither layer interprets page contents beyond the
//! fixed header copied out at pin time.

mod cache;
mod mmap;

pub use cache::{PageBuf, PageCache, PinOutcome, PinnedPage};
pub use mmap::MmapFile;
