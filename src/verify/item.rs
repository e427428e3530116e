//! # Item Walker
//!
//! Shared body validator for every variable-item page flavor: row pages,
//! duplicate pages, and the variable column store. Walks the packed items
//! in storage order, validating type legality, declared lengths, and page
//! bounds; resolves overflow references by pinning and verifying the
//! referenced page; and checks in-page sort order through three rolling
//! slots.
//!
//! ## Slot Rotation
//!
//! The walker tracks at most three items at a time: the current item, the
//! last key seen, and the last duplicate-data value seen. After a
//! successful comparison the current slot becomes the last-of-its-kind and
//! the old last slot becomes the new current; the swap moves the slots'
//! overflow pins and decode buffers with them, so nothing is reallocated
//! per item and every pin is released exactly once when the slots drop.

use std::cmp::Ordering;
use std::mem;

use eyre::Result;
use zerocopy::FromBytes;

use crate::btree::{align_item, ovfl_page_size, ItemHeader, ItemType, OffRef, OvflRef, PageType};
use crate::config::{ITEM_HEADER_SIZE, NO_LEVEL, PAGE_HEADER_SIZE};
use crate::db::{Comparator, Db, Decoder};
use crate::session::{FindingKind, ScratchBuf};
use crate::storage::{PageBuf, PinnedPage};
use crate::verify::page::{eof, eop, verify_page};
use crate::verify::{pin_with_retry, tree, VerifyState};
use crate::verify_bail;

/// Where a slot's comparable bytes live.
#[derive(Default)]
enum View {
    #[default]
    Empty,
    /// Payload slice of the page being walked.
    Inline { off: u32, len: u32 },
    /// Body of a pinned overflow page.
    Ovfl { ovfl: PinnedPage, len: u32 },
    /// Decoded copy in a pooled scratch buffer.
    Decoded(ScratchBuf),
}

#[derive(Default)]
struct Slot {
    indx: u32,
    view: View,
}

impl Slot {
    fn is_set(&self) -> bool {
        !matches!(self.view, View::Empty)
    }

    fn bytes<'a>(&'a self, page: &'a PageBuf) -> &'a [u8] {
        match &self.view {
            View::Empty => &[],
            View::Inline { off, len } => &page.bytes()[*off as usize..(*off + *len) as usize],
            View::Ovfl { ovfl, len } => &ovfl.body()[..*len as usize],
            View::Decoded(buf) => buf,
        }
    }
}

pub(crate) fn decoder_for(db: &Db, item_type: ItemType) -> Option<&dyn Decoder> {
    match item_type {
        ItemType::Key | ItemType::KeyOvfl => db.config().key_decoder.as_deref(),
        ItemType::KeyDup
        | ItemType::KeyDupOvfl
        | ItemType::DataDup
        | ItemType::DataDupOvfl => db.config().data_decoder.as_deref(),
        _ => None,
    }
}

/// Walks and validates every item on a variable-format page.
pub(crate) fn verify_items(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let page_type = page.header().page_type();
    let addr = page.addr();
    let bytes = page.bytes();
    let page_len = bytes.len() as u64;
    let alloc = db.config().alloc_unit as u64;
    let file_size = db.file().file_size();

    // Pages either sort by the row comparator, by the duplicate comparator,
    // or not at all (the variable column store).
    let func: Option<&Comparator> = match page_type {
        PageType::ColVariable => None,
        PageType::DupInternal | PageType::DupLeaf => Some(&db.config().dup_comparator),
        _ => Some(&db.config().key_comparator),
    };

    let mut current = Slot::default();
    let mut last_key = Slot::default();
    let mut last_data = Slot::default();

    let mut off = PAGE_HEADER_SIZE as u64;
    for item_num in 1..=page.header().entries() {
        if off + ITEM_HEADER_SIZE as u64 > page_len {
            return Err(eop(vs, item_num, addr));
        }
        let at = off as usize;
        let hdr = ItemHeader::read_from_bytes(&bytes[at..at + ITEM_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("unreadable item header on page at addr {}: {:?}", addr, e))?;
        let Some(item_type) = hdr.item_type() else {
            verify_bail!(
                vs.findings,
                FindingKind::IllegalType,
                "item {} on page at addr {} has an illegal type of {}",
                item_num,
                addr,
                hdr.type_byte()
            );
        };
        let item_len = hdr.len();

        let legal = match item_type {
            ItemType::Key | ItemType::KeyOvfl => {
                matches!(page_type, PageType::RowInternal | PageType::RowLeaf)
            }
            ItemType::KeyDup | ItemType::KeyDupOvfl => page_type == PageType::DupInternal,
            ItemType::Data | ItemType::DataOvfl => {
                matches!(page_type, PageType::ColVariable | PageType::RowLeaf)
            }
            ItemType::DataDup | ItemType::DataDupOvfl => {
                matches!(page_type, PageType::DupLeaf | PageType::RowLeaf)
            }
            // Tombstones only appear in the variable column store; the
            // fixed-length stores mark deletions inside the record itself.
            ItemType::Del => page_type == PageType::ColVariable,
            ItemType::Off => matches!(
                page_type,
                PageType::DupInternal | PageType::RowInternal | PageType::RowLeaf
            ),
        };
        if !legal {
            verify_bail!(
                vs.findings,
                FindingKind::ItemMismatch,
                "illegal item and page type combination (item {} on page at addr {} is a {} \
                 item on a {} page)",
                item_num,
                addr,
                item_type.name(),
                page_type.name()
            );
        }

        let expected_len = match item_type {
            ItemType::Key | ItemType::KeyDup | ItemType::Data | ItemType::DataDup => None,
            ItemType::KeyOvfl
            | ItemType::KeyDupOvfl
            | ItemType::DataOvfl
            | ItemType::DataDupOvfl => Some(mem::size_of::<OvflRef>()),
            ItemType::Del => Some(0),
            ItemType::Off => Some(mem::size_of::<OffRef>()),
        };
        if let Some(expected) = expected_len {
            if item_len as usize != expected {
                verify_bail!(
                    vs.findings,
                    FindingKind::BadLength,
                    "item {} on page at addr {} has an incorrect length",
                    item_num,
                    addr
                );
            }
        }

        let payload = off + ITEM_HEADER_SIZE as u64;
        let next = align_item(payload + item_len as u64);
        if next > page_len {
            return Err(eop(vs, item_num, addr));
        }
        let payload = payload as usize;

        // Resolve and verify any overflow reference before the item's value
        // is used for anything.
        let mut resolved: Option<PinnedPage> = None;
        let mut ovfl_len = 0u32;
        if item_type.is_overflow() {
            let ovfl = OvflRef::read_from_bytes(&bytes[payload..payload + mem::size_of::<OvflRef>()])
                .map_err(|e| {
                    eyre::eyre!("unreadable overflow reference on page at addr {}: {:?}", addr, e)
                })?;
            let page_size = ovfl_page_size(db.config().alloc_unit, ovfl.size());
            if ovfl.addr() as u64 * alloc + page_size > file_size || page_size > u32::MAX as u64 {
                return Err(eof(vs, item_num, addr));
            }

            let ovfl_page = pin_with_retry(db, ovfl.addr(), page_size as u32)?;
            verify_page(db, vs, &ovfl_page)?;

            if ovfl.size() != ovfl_page.header().datalen() {
                verify_bail!(
                    vs.findings,
                    FindingKind::OverflowSizeMismatch,
                    "overflow page reference in item {} on page at addr {} does not match \
                     the data size on the overflow page",
                    item_num,
                    addr
                );
            }
            ovfl_len = ovfl.size();
            resolved = Some(ovfl_page);
        } else if item_type == ItemType::Off {
            let child = OffRef::read_from_bytes(&bytes[payload..payload + mem::size_of::<OffRef>()])
                .map_err(|e| {
                    eyre::eyre!("unreadable child reference on page at addr {}: {:?}", addr, e)
                })?;
            if child.addr() as u64 * alloc + child.size() as u64 > file_size {
                return Err(eof(vs, item_num, addr));
            }
        }

        // Sortable items get a comparable view; everything else is done.
        let sortable = matches!(
            item_type,
            ItemType::Key
                | ItemType::KeyOvfl
                | ItemType::KeyDup
                | ItemType::KeyDupOvfl
                | ItemType::DataDup
                | ItemType::DataDupOvfl
        );
        if sortable {
            current.indx = item_num;
            current.view = match resolved {
                Some(ovfl) => View::Ovfl { ovfl, len: ovfl_len },
                None => View::Inline {
                    off: (off + ITEM_HEADER_SIZE as u64) as u32,
                    len: item_len,
                },
            };

            if let Some(decoder) = decoder_for(db, item_type) {
                let mut buf = vs.scratch.acquire();
                decoder.decode(current.bytes(page), &mut buf)?;
                current.view = View::Decoded(buf);
            }

            let last = match item_type {
                ItemType::DataDup | ItemType::DataDupOvfl => &mut last_data,
                _ => &mut last_key,
            };
            if last.is_set() {
                if let Some(func) = func {
                    if func(last.bytes(page), current.bytes(page)) != Ordering::Less {
                        verify_bail!(
                            vs.findings,
                            FindingKind::MisorderedItems,
                            "item {} and item {} on page at addr {} are incorrectly sorted",
                            last.indx,
                            current.indx,
                            addr
                        );
                    }
                }
            }
            mem::swap(&mut current, last);
        }

        // Off-page duplicate trees hang off row-store leaves; walk them as
        // self-contained subtrees.
        if page_type == PageType::RowLeaf && item_type == ItemType::Off {
            let child = OffRef::read_from_bytes(&bytes[payload..payload + mem::size_of::<OffRef>()])
                .map_err(|e| {
                    eyre::eyre!("unreadable child reference on page at addr {}: {:?}", addr, e)
                })?;
            tree::walk(db, vs, None, 0, NO_LEVEL, &child.into())?;
        }

        off = next;
    }

    Ok(())
}
