//! # Tree Walker
//!
//! Depth-first, left-to-right recursion over the tree. Each call pins one
//! child page, verifies it, and checks its connection to the parent: tree
//! level, record count, record-number range (column stores), and the key
//! boundary protocol (row and duplicate stores).
//!
//! ## Key Boundary Protocol
//!
//! Two connection checks tie a page to its parent. First, the routing key
//! that led here must sort less than or equal to the first key on this
//! page. Second, the largest key of the subtree immediately to the left
//! must sort strictly before the routing key: every time the walk finishes
//! a row or duplicate leaf it parks the pinned page in the rolling
//! last-leaf slot, and the next routing entry compares its key against
//! that leaf's last entry before the slot is released. The final subtree's
//! last leaf has no successor routing key and is simply dropped.
//!
//! Off-page duplicate trees are walked through the same entry point; the
//! item walker hands them in with the root sentinel level.

use std::cmp::Ordering;

use eyre::Result;
use zerocopy::FromBytes;

use crate::btree::{inmem, ovfl_page_size, ItemHeader, OffEntry, OvflRef, PageIndex, PageType};
use crate::config::{ITEM_HEADER_SIZE, NO_LEVEL};
use crate::db::{Comparator, Db};
use crate::session::{FindingKind, ScratchBuf};
use crate::storage::{PageBuf, PinnedPage};
use crate::verify::item::decoder_for;
use crate::verify::page::verify_page;
use crate::verify::{pin_with_retry, LastLeaf, VerifyState};
use crate::verify_bail;

/// Walks the tree from the root reference recorded in the descriptor.
pub(crate) fn walk_root(db: &Db, vs: &mut VerifyState<'_>, addr: u32, size: u32) -> Result<()> {
    walk(
        db,
        vs,
        None,
        0,
        NO_LEVEL,
        &OffEntry {
            records: 0,
            addr,
            size,
        },
    )
}

/// Verifies the subtree rooted at `child_ref`.
///
/// `parent_key` is the parent page and the offset of the routing key that
/// led here (absent for root calls). `level` is the expected tree level,
/// or the no-level sentinel for "this is a root; adopt the page's level".
pub(crate) fn walk(
    db: &Db,
    vs: &mut VerifyState<'_>,
    parent_key: Option<(&PageBuf, u32)>,
    start_recno: u64,
    level: u8,
    child_ref: &OffEntry,
) -> Result<()> {
    let is_root = level == NO_LEVEL;

    // No reference may claim a zero-size page, the root's included.
    if child_ref.size == 0 {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "page reference at addr {} has a zero size",
            child_ref.addr
        );
    }

    // If the page was rewritten while we pin it, the retry is safe: the
    // reference we hold comes from a pinned parent, which a rewrite has
    // already updated.
    let page = pin_with_retry(db, child_ref.addr, child_ref.size)?;
    verify_page(db, vs, &page)?;

    let index = inmem::parse(&page, db.config().fixed_len).map_err(|e| {
        vs.findings.record(
            FindingKind::BadHeader,
            format!("page at addr {} has a malformed body: {}", page.addr(), e),
        )
    })?;

    let hdr = page.header();

    // The root teaches us the tree height; everything below it must match
    // what its parent recorded.
    let level = if is_root {
        hdr.level()
    } else {
        if hdr.level() != level {
            verify_bail!(
                vs.findings,
                FindingKind::LevelMismatch,
                "page at addr {} has a tree level of {} where the expected level was {}",
                page.addr(),
                hdr.level(),
                level
            );
        }
        level
    };

    if !is_root && hdr.records() != child_ref.records {
        verify_bail!(
            vs.findings,
            FindingKind::RecordCountMismatch,
            "page at addr {} has a record count of {} where the expected record count was {}",
            page.addr(),
            hdr.records(),
            child_ref.records
        );
    }
    if index.records != hdr.records() {
        verify_bail!(
            vs.findings,
            FindingKind::RecordCountMismatch,
            "page at addr {} contains {} records where its header claims {}",
            page.addr(),
            index.records,
            hdr.records()
        );
    }

    match hdr.page_type() {
        PageType::ColFixed | PageType::ColInternal | PageType::ColRcc | PageType::ColVariable => {
            // Column-store siblings carry contiguous record-number ranges;
            // the root starts the numbering at 1.
            let expected = if is_root { 1 } else { start_recno };
            if hdr.start_recno() != expected {
                verify_bail!(
                    vs.findings,
                    FindingKind::StartRecnoMismatch,
                    "page at addr {} has a starting record of {} where the expected starting \
                     record was {}",
                    page.addr(),
                    hdr.start_recno(),
                    expected
                );
            }
        }
        PageType::DupInternal | PageType::DupLeaf | PageType::RowInternal | PageType::RowLeaf => {
            if hdr.start_recno() != 0 {
                verify_bail!(
                    vs.findings,
                    FindingKind::StartRecnoMismatch,
                    "page at addr {} has a starting record of {}, which should never be non-zero",
                    page.addr(),
                    hdr.start_recno()
                );
            }
            if let Some((parent_page, key_off)) = parent_key {
                boundary_check(db, vs, parent_page, key_off, &page, &index, true)?;
            }
        }
        _ => {}
    }

    match hdr.page_type() {
        // Column leaves need no further processing.
        PageType::ColFixed | PageType::ColRcc | PageType::ColVariable => Ok(()),

        // Row and duplicate leaves stay pinned: their last entry bounds the
        // next routing key the walk encounters.
        PageType::DupLeaf | PageType::RowLeaf => {
            vs.leaf = Some(LastLeaf { page, index });
            Ok(())
        }

        PageType::ColInternal => {
            let mut recno = hdr.start_recno();
            for entry in &index.col_entries {
                walk(db, vs, None, recno, level - 1, entry)?;
                recno += entry.records;
            }
            vs.leaf = None;
            Ok(())
        }

        PageType::DupInternal | PageType::RowInternal => {
            for entry in &index.routing {
                // The largest key under the subtree to our immediate left
                // must sort strictly before this routing key. It is the
                // last entry of the leaf saved when that subtree finished.
                if let Some(leaf) = vs.leaf.take() {
                    boundary_check(db, vs, &page, entry.key_off, &leaf.page, &leaf.index, false)?;
                }
                walk(db, vs, Some((&*page, entry.key_off)), 0, level - 1, &entry.off)?;
            }
            vs.leaf = None;
            Ok(())
        }

        other => {
            verify_bail!(
                vs.findings,
                FindingKind::BadHeader,
                "page at addr {} is a {} page where a tree page was expected",
                page.addr(),
                other.name()
            );
        }
    }
}

/// A materialized key: the comparable bytes of one item, wherever they
/// live.
enum Cell {
    Inline { off: u32, len: u32 },
    Ovfl { ovfl: PinnedPage, len: u32 },
    Decoded(ScratchBuf),
}

impl Cell {
    fn bytes<'a>(&'a self, page: &'a PageBuf) -> &'a [u8] {
        match self {
            Cell::Inline { off, len } => &page.bytes()[*off as usize..(*off + *len) as usize],
            Cell::Ovfl { ovfl, len } => &ovfl.body()[..*len as usize],
            Cell::Decoded(buf) => buf,
        }
    }
}

/// Builds the comparable view of the item at `item_off`, pinning its
/// overflow page and decoding as needed. The page has already passed item
/// validation.
fn materialize(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf, item_off: u32) -> Result<Cell> {
    let bytes = page.bytes();
    let at = item_off as usize;
    let hdr = bytes
        .get(at..at + ITEM_HEADER_SIZE)
        .and_then(|b| ItemHeader::read_from_bytes(b).ok())
        .ok_or_else(|| eyre::eyre!("unreadable item at offset {} on page at addr {}", item_off, page.addr()))?;
    let item_type = hdr
        .item_type()
        .ok_or_else(|| eyre::eyre!("illegal item type at offset {} on page at addr {}", item_off, page.addr()))?;

    let payload = at + ITEM_HEADER_SIZE;
    let mut cell = if item_type.is_overflow() {
        let ovfl = bytes
            .get(payload..payload + std::mem::size_of::<OvflRef>())
            .and_then(|b| OvflRef::read_from_bytes(b).ok())
            .ok_or_else(|| {
                eyre::eyre!("unreadable overflow reference on page at addr {}", page.addr())
            })?;
        let page_size = ovfl_page_size(db.config().alloc_unit, ovfl.size());
        let pin = pin_with_retry(db, ovfl.addr(), page_size as u32)?;
        let len = pin.header().datalen();
        Cell::Ovfl { ovfl: pin, len }
    } else {
        Cell::Inline {
            off: item_off + ITEM_HEADER_SIZE as u32,
            len: hdr.len(),
        }
    };

    if let Some(decoder) = decoder_for(db, item_type) {
        let mut buf = vs.scratch.acquire();
        decoder.decode(cell.bytes(page), &mut buf)?;
        cell = Cell::Decoded(buf);
    }
    Ok(cell)
}

/// Compares a parent routing key against the first or last key of a child
/// page. The comparison is strict in both directions: a child's first key
/// below its routing key, or its last key at-or-above the routing key for
/// the subsequent subtree, are distinct failures.
fn boundary_check(
    db: &Db,
    vs: &mut VerifyState<'_>,
    parent: &PageBuf,
    parent_key_off: u32,
    child: &PageBuf,
    child_index: &PageIndex,
    first_entry: bool,
) -> Result<()> {
    let func: &Comparator = match child.header().page_type() {
        PageType::DupInternal | PageType::DupLeaf => &db.config().dup_comparator,
        _ => &db.config().key_comparator,
    };

    let child_off = if first_entry {
        child_index.key_items.first()
    } else {
        child_index.key_items.last()
    };
    let Some(&child_off) = child_off else {
        return Ok(());
    };

    let child_cell = materialize(db, vs, child, child_off)?;
    let parent_cell = materialize(db, vs, parent, parent_key_off)?;
    let cmp = func(child_cell.bytes(child), parent_cell.bytes(parent));

    if first_entry && cmp == Ordering::Less {
        verify_bail!(
            vs.findings,
            FindingKind::BoundaryViolation,
            "the first key on page at addr {} sorts before its reference key on the parent page",
            child.addr()
        );
    }
    if !first_entry && cmp != Ordering::Less {
        verify_bail!(
            vs.findings,
            FindingKind::BoundaryViolation,
            "the last key on page at addr {} sorts after the parent page's key for the \
             subsequent page",
            child.addr()
        );
    }
    Ok(())
}
