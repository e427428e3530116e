//! # In-Memory Page Index
//!
//! Zero-interpretation pages become useful through [`parse`], which lays out
//! a per-page index over a pinned page's raw bytes: the sortable entries on
//! row and duplicate pages, the routing entries of internal pages, and the
//! record count the page contributes to its subtree.
//!
//! The derived `records` value is what the tree walker compares against the
//! parent's off-page reference:
//!
//! - column-fixed: one record per entry
//! - column-rcc: the sum of the repeat counts
//! - column-variable: one record per data or tombstone item
//! - row-leaf: one record per data item, plus the record counts of any
//!   off-page duplicate subtrees
//! - duplicate-leaf: one record per duplicate-data item
//! - internal pages: the sum of the child reference counts

use eyre::{ensure, eyre, Result};
use smallvec::SmallVec;
use zerocopy::FromBytes;

use crate::btree::page::{align_item, ItemHeader, ItemType, OffRef, PageType};
use crate::config::{ITEM_HEADER_SIZE, PAGE_HEADER_SIZE, RCC_REPEAT_SIZE};
use crate::storage::PageBuf;

/// Owned copy of an off-page reference.
#[derive(Debug, Clone, Copy)]
pub struct OffEntry {
    pub records: u64,
    pub addr: u32,
    pub size: u32,
}

impl From<OffRef> for OffEntry {
    fn from(off: OffRef) -> Self {
        Self {
            records: off.records(),
            addr: off.addr(),
            size: off.size(),
        }
    }
}

/// One routing entry of a row or duplicate internal page: the key item's
/// page offset and the child reference that follows it.
#[derive(Debug, Clone, Copy)]
pub struct RoutingEntry {
    pub key_off: u32,
    pub off: OffEntry,
}

/// Parsed view of one page.
#[derive(Debug, Default)]
pub struct PageIndex {
    /// Records in the subtree rooted at this page, derived from the body.
    pub records: u64,
    /// Offsets of the page's sortable entries, in storage order: keys on
    /// row pages, routing keys on internal pages, duplicate data on
    /// duplicate leaves.
    pub key_items: SmallVec<[u32; 16]>,
    /// Routing entries (row-internal, duplicate-internal).
    pub routing: SmallVec<[RoutingEntry; 8]>,
    /// Child references (column-internal).
    pub col_entries: SmallVec<[OffEntry; 8]>,
}

/// Builds the in-memory index for a pinned page.
///
/// Expects a page that already passed the page-level validator; malformed
/// item sequences that the validator cannot see (a routing key with no
/// child reference, for instance) still surface as errors here.
pub fn parse(page: &PageBuf, fixed_len: u32) -> Result<PageIndex> {
    let mut index = PageIndex::default();

    match page.header().page_type() {
        PageType::ColInternal => parse_col_internal(page, &mut index)?,
        PageType::ColFixed => {
            index.records = page.header().entries() as u64;
        }
        PageType::ColRcc => parse_col_rcc(page, fixed_len, &mut index)?,
        PageType::ColVariable
        | PageType::RowInternal
        | PageType::RowLeaf
        | PageType::DupInternal
        | PageType::DupLeaf => parse_items(page, &mut index)?,
        PageType::Descriptor | PageType::Overflow | PageType::Invalid => {}
    }

    Ok(index)
}

fn parse_col_internal(page: &PageBuf, index: &mut PageIndex) -> Result<()> {
    let bytes = page.bytes();
    let entry_size = std::mem::size_of::<OffRef>();
    let mut off = PAGE_HEADER_SIZE;

    for num in 1..=page.header().entries() {
        ensure!(
            off + entry_size <= bytes.len(),
            "entry {} on page at addr {} extends past the end of the page",
            num,
            page.addr()
        );
        let child = OffRef::read_from_bytes(&bytes[off..off + entry_size])
            .map_err(|e| eyre!("unreadable child reference on page at addr {}: {:?}", page.addr(), e))?;
        index.records += child.records();
        index.col_entries.push(child.into());
        off += entry_size;
    }
    Ok(())
}

fn parse_col_rcc(page: &PageBuf, fixed_len: u32, index: &mut PageIndex) -> Result<()> {
    ensure!(
        fixed_len > 0,
        "run-length-compressed page at addr {} in a database with no fixed record length",
        page.addr()
    );
    let bytes = page.bytes();
    let entry_size = RCC_REPEAT_SIZE + fixed_len as usize;
    let mut off = PAGE_HEADER_SIZE;

    for num in 1..=page.header().entries() {
        ensure!(
            off + entry_size <= bytes.len(),
            "entry {} on page at addr {} extends past the end of the page",
            num,
            page.addr()
        );
        let repeat = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        index.records += repeat as u64;
        off += entry_size;
    }
    Ok(())
}

fn parse_items(page: &PageBuf, index: &mut PageIndex) -> Result<()> {
    let page_type = page.header().page_type();
    let bytes = page.bytes();
    let len = bytes.len() as u64;
    let mut off = PAGE_HEADER_SIZE as u64;
    let mut pending_key: Option<u32> = None;

    for num in 1..=page.header().entries() {
        ensure!(
            off + ITEM_HEADER_SIZE as u64 <= len,
            "item {} on page at addr {} extends past the end of the page",
            num,
            page.addr()
        );
        let at = off as usize;
        let hdr = ItemHeader::read_from_bytes(&bytes[at..at + ITEM_HEADER_SIZE])
            .map_err(|e| eyre!("unreadable item header on page at addr {}: {:?}", page.addr(), e))?;
        let item_type = hdr
            .item_type()
            .ok_or_else(|| eyre!("item {} on page at addr {} has an illegal type", num, page.addr()))?;
        let payload = off + ITEM_HEADER_SIZE as u64;
        let next = align_item(payload + hdr.len() as u64);
        ensure!(
            next <= len,
            "item {} on page at addr {} extends past the end of the page",
            num,
            page.addr()
        );

        match item_type {
            ItemType::Key | ItemType::KeyOvfl => match page_type {
                PageType::RowInternal => {
                    ensure!(
                        pending_key.is_none(),
                        "routing key item {} on page at addr {} follows a key with no child reference",
                        num,
                        page.addr()
                    );
                    pending_key = Some(off as u32);
                    index.key_items.push(off as u32);
                }
                _ => index.key_items.push(off as u32),
            },
            ItemType::KeyDup | ItemType::KeyDupOvfl => {
                ensure!(
                    pending_key.is_none(),
                    "routing key item {} on page at addr {} follows a key with no child reference",
                    num,
                    page.addr()
                );
                pending_key = Some(off as u32);
                index.key_items.push(off as u32);
            }
            ItemType::Data | ItemType::DataOvfl | ItemType::Del => {
                index.records += 1;
            }
            ItemType::DataDup | ItemType::DataDupOvfl => {
                index.records += 1;
                if page_type == PageType::DupLeaf {
                    index.key_items.push(off as u32);
                }
            }
            ItemType::Off => {
                ensure!(
                    hdr.len() as usize == std::mem::size_of::<OffRef>(),
                    "child reference item {} on page at addr {} has an incorrect length",
                    num,
                    page.addr()
                );
                let child = OffRef::read_from_bytes(&bytes[payload as usize..payload as usize + 16])
                    .map_err(|e| {
                        eyre!("unreadable child reference on page at addr {}: {:?}", page.addr(), e)
                    })?;
                index.records += child.records();
                match page_type {
                    PageType::RowInternal | PageType::DupInternal => {
                        let key_off = pending_key.take().ok_or_else(|| {
                            eyre!(
                                "child reference item {} on page at addr {} has no routing key",
                                num,
                                page.addr()
                            )
                        })?;
                        index.routing.push(RoutingEntry {
                            key_off,
                            off: child.into(),
                        });
                    }
                    _ => {}
                }
            }
        }

        off = next;
    }

    ensure!(
        pending_key.is_none(),
        "page at addr {} ends with a routing key that has no child reference",
        page.addr()
    );
    Ok(())
}
