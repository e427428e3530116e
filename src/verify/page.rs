//! # Page-Level Validation
//!
//! One entry point, [`verify_page`], dispatching on the page type: header
//! checks shared by every flavor (recognized type, level constraint, zeroed
//! reserved fields), the coverage claim, and then the per-flavor body
//! validator. Variable-item bodies are handled by the item walker; the
//! fixed-shape bodies (descriptor, column stores, overflow) are handled
//! here.

use eyre::{bail, Result};
use zerocopy::FromBytes;

use crate::btree::{DescRecord, OffRef, PageType, DESC_FLAGS_MASK, DESC_REPEAT};
use crate::config::{
    BTREE_MAGIC, BTREE_MAJOR_VERSION, BTREE_MINOR_VERSION, DESC_RECORD_SIZE, FIX_DELETE_BYTE,
    LEAF_LEVEL, NO_LEVEL, PAGE_HEADER_SIZE, PROGRESS_INTERVAL, RCC_REPEAT_MAX, RCC_REPEAT_SIZE,
};
use crate::db::Db;
use crate::session::FindingKind;
use crate::storage::PageBuf;
use crate::verify::{item, VerifyState};
use crate::verify_bail;

/// Verifies a single page: coverage, header, and body.
pub(crate) fn verify_page(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let hdr = page.header();
    let addr = page.addr();

    vs.fcnt += 1;
    if vs.fcnt % PROGRESS_INTERVAL == 0 {
        if let Some(f) = vs.progress.as_mut() {
            f(&vs.name, vs.fcnt);
        }
    }

    add_frag(db, vs, page)?;

    // FUTURE: check the lsn against the existing log files.
    if hdr.lsn() != [0, 0] {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "page at addr {} has non-zero lsn header fields",
            addr
        );
    }

    // The checksum was verified when the page was first read.

    let page_type = hdr.page_type();
    if page_type == PageType::Invalid {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "page at addr {} has an invalid type of {}",
            addr,
            hdr.type_byte()
        );
    }

    let level_ok = match page_type {
        PageType::Descriptor => hdr.level() == NO_LEVEL,
        PageType::ColFixed
        | PageType::ColRcc
        | PageType::ColVariable
        | PageType::DupLeaf
        | PageType::Overflow
        | PageType::RowLeaf => hdr.level() == LEAF_LEVEL,
        PageType::ColInternal | PageType::DupInternal | PageType::RowInternal => {
            hdr.level() > LEAF_LEVEL
        }
        PageType::Invalid => false,
    };
    if !level_ok {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "{} page at addr {} has incorrect tree level of {}",
            page_type.name(),
            addr,
            hdr.level()
        );
    }

    if hdr.unused() != &[0, 0] {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "page at addr {} has non-zero unused header fields",
            addr
        );
    }
    if hdr.reserved().iter().any(|&b| b != 0) {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "page at addr {} has non-zero reserved header bytes",
            addr
        );
    }

    match page_type {
        PageType::Descriptor => verify_desc(db, vs, page)?,
        PageType::ColVariable
        | PageType::DupInternal
        | PageType::DupLeaf
        | PageType::RowInternal
        | PageType::RowLeaf => item::verify_items(db, vs, page)?,
        PageType::ColInternal => verify_col_int(db, vs, page)?,
        PageType::ColFixed => verify_col_fix(db, vs, page)?,
        PageType::ColRcc => verify_col_rcc(db, vs, page)?,
        PageType::Overflow => verify_ovfl(vs, page)?,
        PageType::Invalid => unreachable!("rejected above"),
    }

    if let Some(out) = vs.dump.as_deref_mut() {
        super::dump::dump_page(out, page)
            .map_err(|e| eyre::eyre!("failed to write page dump: {}", e))?;
    }

    Ok(())
}

/// Claims the page's extent in the coverage bitmap; claiming an allocation
/// unit twice means two reachable pages overlap.
fn add_frag(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let addr = page.addr();
    let frags = page.size() / db.config().alloc_unit;
    if addr as u64 + frags as u64 > vs.fragbits.len() as u64 {
        verify_bail!(
            vs.findings,
            FindingKind::EndOfFile,
            "page at addr {} extends past the last file fragment",
            addr
        );
    }
    if vs.fragbits.claim(addr, frags).is_err() {
        verify_bail!(
            vs.findings,
            FindingKind::DuplicateCoverage,
            "page fragment at addr {} already verified",
            addr
        );
    }
    Ok(())
}

/// Item extends past the end of the page.
pub(crate) fn eop(vs: &mut VerifyState<'_>, item_num: u32, addr: u32) -> eyre::Report {
    vs.findings.record(
        FindingKind::EndOfPage,
        format!(
            "item {} on page at addr {} extends past the end of the page",
            item_num, addr
        ),
    )
}

/// Item references file pages past the end of the file.
pub(crate) fn eof(vs: &mut VerifyState<'_>, item_num: u32, addr: u32) -> eyre::Report {
    vs.findings.record(
        FindingKind::EndOfFile,
        format!(
            "off-page item {} on page at addr {} references non-existent file pages",
            item_num, addr
        ),
    )
}

/// Deleted fixed-length entry carries non-zero payload bytes.
fn delfmt(vs: &mut VerifyState<'_>, entry_num: u32, addr: u32) -> eyre::Report {
    vs.findings.record(
        FindingKind::BadDeleteFormat,
        format!(
            "deleted fixed-length entry {} on page at addr {} has non-zero bytes",
            entry_num, addr
        ),
    )
}

/// Checks the descriptor record against the handle's configuration. Every
/// mismatched field is reported before the page fails as a whole.
fn verify_desc(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let cfg = db.config();
    let addr = page.addr();
    let before = vs.findings.len();
    let desc = DescRecord::read_from_bytes(&page.body()[..DESC_RECORD_SIZE])
        .map_err(|e| eyre::eyre!("failed to read descriptor record: {:?}", e))?;

    let mismatch = |vs: &mut VerifyState<'_>, message: String| {
        vs.findings.push(FindingKind::DescriptorMismatch, message);
    };

    if desc.magic() != BTREE_MAGIC {
        mismatch(
            vs,
            format!("magic number {:#x}, expected {:#x}", desc.magic(), BTREE_MAGIC),
        );
    }
    if desc.major() != BTREE_MAJOR_VERSION {
        mismatch(
            vs,
            format!("major version {}, expected {}", desc.major(), BTREE_MAJOR_VERSION),
        );
    }
    if desc.minor() != BTREE_MINOR_VERSION {
        mismatch(
            vs,
            format!("minor version {}, expected {}", desc.minor(), BTREE_MINOR_VERSION),
        );
    }
    if desc.intlmin() != cfg.intlmin {
        mismatch(
            vs,
            format!(
                "minimum internal page size {}, expected {}",
                desc.intlmin(),
                cfg.intlmin
            ),
        );
    }
    if desc.intlmax() != cfg.intlmax {
        mismatch(
            vs,
            format!(
                "maximum internal page size {}, expected {}",
                desc.intlmax(),
                cfg.intlmax
            ),
        );
    }
    if desc.leafmin() != cfg.leafmin {
        mismatch(
            vs,
            format!("minimum leaf page size {}, expected {}", desc.leafmin(), cfg.leafmin),
        );
    }
    if desc.leafmax() != cfg.leafmax {
        mismatch(
            vs,
            format!("maximum leaf page size {}, expected {}", desc.leafmax(), cfg.leafmax),
        );
    }
    if desc.fixed_len() != cfg.fixed_len {
        mismatch(
            vs,
            format!(
                "fixed record length {}, expected {}",
                desc.fixed_len(),
                cfg.fixed_len
            ),
        );
    }
    if desc.recno_offset() != 0 {
        mismatch(
            vs,
            format!("recno offset {}, expected 0", desc.recno_offset()),
        );
    }
    if desc.flags() & !DESC_FLAGS_MASK != 0 {
        mismatch(vs, "unexpected flags found in descriptor record".to_string());
    }
    let repeat = desc.flags() & DESC_REPEAT != 0;
    if repeat && desc.fixed_len() == 0 {
        mismatch(
            vs,
            "repeat counts configured but no fixed length record size specified".to_string(),
        );
    }
    if repeat != cfg.repeat_compression {
        mismatch(
            vs,
            format!(
                "repeat-count compression {}, expected {}",
                if repeat { "on" } else { "off" },
                if cfg.repeat_compression { "on" } else { "off" }
            ),
        );
    }
    if desc.unused().iter().any(|&b| b != 0) {
        mismatch(
            vs,
            "unexpected values found in descriptor record's unused fields".to_string(),
        );
    }

    if vs.findings.len() > before {
        bail!(
            "descriptor record at addr {} does not match the database configuration",
            addr
        );
    }
    Ok(())
}

/// Column-internal body: packed child references, each within the page and
/// pointing inside the file.
fn verify_col_int(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let bytes = page.bytes();
    let addr = page.addr();
    let alloc = db.config().alloc_unit as u64;
    let file_size = db.file().file_size();
    let entry_size = std::mem::size_of::<OffRef>();

    let mut off = PAGE_HEADER_SIZE;
    for entry_num in 1..=page.header().entries() {
        if off + entry_size > bytes.len() {
            return Err(eop(vs, entry_num, addr));
        }
        let child = OffRef::read_from_bytes(&bytes[off..off + entry_size])
            .map_err(|e| eyre::eyre!("unreadable child reference on page at addr {}: {:?}", addr, e))?;
        if child.addr() as u64 * alloc + child.size() as u64 > file_size {
            return Err(eof(vs, entry_num, addr));
        }
        off += entry_size;
    }
    Ok(())
}

/// Column-fixed body: fixed-length records; tombstones are all zero past
/// the marker byte.
fn verify_col_fix(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let len = db.config().fixed_len as usize;
    let addr = page.addr();
    if len == 0 {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "column-fixed page at addr {} in a database with no fixed record length",
            addr
        );
    }

    let bytes = page.bytes();
    let mut off = PAGE_HEADER_SIZE;
    for entry_num in 1..=page.header().entries() {
        if off + len > bytes.len() {
            return Err(eop(vs, entry_num, addr));
        }
        let record = &bytes[off..off + len];
        if record[0] & FIX_DELETE_BYTE != 0 {
            if record[0] != FIX_DELETE_BYTE || record[1..].iter().any(|&b| b != 0) {
                return Err(delfmt(vs, entry_num, addr));
            }
        }
        off += len;
    }
    Ok(())
}

/// Column-rcc body: `(repeat, record)` runs. A zero repeat count and a
/// missed compression opportunity (identical adjacent records while the
/// earlier count is below the maximum) are both format errors.
fn verify_col_rcc(db: &Db, vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let fixed_len = db.config().fixed_len as usize;
    let addr = page.addr();
    if fixed_len == 0 {
        verify_bail!(
            vs.findings,
            FindingKind::BadHeader,
            "run-length-compressed page at addr {} in a database with no fixed record length",
            addr
        );
    }

    let bytes = page.bytes();
    let entry_size = RCC_REPEAT_SIZE + fixed_len;
    let mut last: Option<(u16, usize)> = None;

    let mut off = PAGE_HEADER_SIZE;
    for entry_num in 1..=page.header().entries() {
        if off + entry_size > bytes.len() {
            return Err(eop(vs, entry_num, addr));
        }
        let repeat = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        if repeat == 0 {
            verify_bail!(
                vs.findings,
                FindingKind::BadRccCount,
                "fixed-length entry {} on page at addr {} has a repeat count of 0",
                entry_num,
                addr
            );
        }

        let record_off = off + RCC_REPEAT_SIZE;
        let record = &bytes[record_off..record_off + fixed_len];
        if record[0] & FIX_DELETE_BYTE != 0 {
            if record[0] != FIX_DELETE_BYTE || record[1..].iter().any(|&b| b != 0) {
                return Err(delfmt(vs, entry_num, addr));
            }
        }

        if let Some((last_repeat, last_off)) = last {
            let last_record = &bytes[last_off..last_off + fixed_len];
            if last_record == record && last_repeat < RCC_REPEAT_MAX {
                verify_bail!(
                    vs.findings,
                    FindingKind::BadRccCount,
                    "fixed-length entries {} and {} on page at addr {} are identical and \
                     should have been compressed",
                    entry_num - 1,
                    entry_num,
                    addr
                );
            }
        }
        last = Some((repeat, record_off));
        off += entry_size;
    }
    Ok(())
}

/// Overflow body: a nonempty payload, and zero padding from its end to the
/// end of the page.
fn verify_ovfl(vs: &mut VerifyState<'_>, page: &PageBuf) -> Result<()> {
    let addr = page.addr();
    let datalen = page.header().datalen() as usize;

    if datalen == 0 {
        verify_bail!(
            vs.findings,
            FindingKind::OverflowEmpty,
            "overflow page at addr {} has no data",
            addr
        );
    }
    if PAGE_HEADER_SIZE + datalen > page.size() as usize {
        return Err(eop(vs, 1, addr));
    }
    if page.bytes()[PAGE_HEADER_SIZE + datalen..].iter().any(|&b| b != 0) {
        verify_bail!(
            vs.findings,
            FindingKind::OverflowTrailingGarbage,
            "overflow page at addr {} has non-zero trailing bytes",
            addr
        );
    }
    Ok(())
}
