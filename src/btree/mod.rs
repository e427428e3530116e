//! # B-Tree On-Disk Format
//!
//! The B-tree file is a forest of fixed-header pages addressed by
//! allocation-unit index. Page 0 carries the descriptor record naming the
//! database-wide format parameters and the root reference; every other
//! reachable page is one of the row-store, column-store, duplicate-tree, or
//! overflow flavors.
//!
//! ```text
//! descriptor @0
//!     └─ root (row-internal)
//!          ├─ row-leaf            keys + inline/overflow data
//!          │    └─ off-page duplicate subtree (dup-internal/dup-leaf)
//!          └─ row-leaf
//! ```
//!
//! Column stores replace the key items with record-number arithmetic: every
//! column page carries the first record number it covers, and internal pages
//! hold bare child references whose record counts partition the range.
//!
//! ## Module Organization
//!
//! - `page`: bit-exact on-disk structs (header, descriptor, items, refs)
//! - `inmem`: parsed per-page index built over a pinned page

pub mod inmem;
pub mod page;

pub use inmem::{OffEntry, PageIndex, RoutingEntry};
pub use page::{
    align_item, ovfl_page_size, DescRecord, ItemHeader, ItemType, OffRef, OvflRef, PageHeader,
    PageType, DESC_FLAGS_MASK, DESC_REPEAT,
};
