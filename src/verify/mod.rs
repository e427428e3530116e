//! # Offline Structural Verifier
//!
//! Walks every page reachable from the root of a B-tree file, validates the
//! on-disk encoding of each page, checks key ordering both within pages and
//! across parent/child boundaries, and confirms that every allocation unit
//! of the file is claimed by exactly one reachable page.
//!
//! ## Traversal
//!
//! ```text
//! verify
//!   ├─ allocate the coverage bitmap (one bit per allocation unit)
//!   ├─ pin + verify the descriptor page; hold the pin for the whole run
//!   │    (the root must not move between reading the descriptor and
//!   │     reading the root)
//!   ├─ walk the tree depth-first from the root reference
//!   │    ├─ per page: header checks, coverage claim, body validation
//!   │    ├─ internal pages: recurse left-to-right, checking levels,
//!   │    │    record counts, record-number ranges, and key boundaries
//!   │    └─ row/duplicate leaves: kept pinned as the rolling "last leaf"
//!   │         for the next boundary comparison
//!   ├─ scan the bitmap for unclaimed fragments
//!   └─ release every pin, report final progress
//! ```
//!
//! ## Error Discipline
//!
//! Every structural problem is pushed into the findings sink with the page
//! address (and item number where there is one) before the walk unwinds.
//! Page-local validators may report several findings for one page; the
//! traversal stops at the first failing page. The report's first finding is
//! the error the run stopped on. Errors with no finding attached (an
//! unreadable file, say) propagate as plain errors instead of a report.
//!
//! ## Pins
//!
//! Three scopes hold page pins: the walker's current page, the rolling
//! last-leaf, and the item walker's slots. All of them release through RAII
//! on every exit path. The buffer manager may answer a pin with a retry
//! signal when a page was rewritten; the pin site re-pins through a bounded
//! loop, relying on the pinned parent to carry the updated reference.

mod dump;
mod frag;
mod item;
mod page;
mod tree;

use std::io;

use eyre::{bail, Result};
use tracing::debug;
use zerocopy::FromBytes;

use crate::btree::{DescRecord, PageIndex};
use crate::config::{DESC_RECORD_SIZE, MAX_FRAGS, PIN_RETRY_LIMIT};
use crate::db::Db;
use crate::session::{Findings, FindingKind, ScratchPool, VerifyReport};
use crate::storage::{PinOutcome, PinnedPage};
use crate::verify_bail;

pub(crate) use frag::FragBitmap;

/// Options of one verification run.
#[derive(Default)]
pub struct VerifyOptions<'a> {
    /// Invoked with the database name and the running page count every few
    /// pages, and once more when the run finishes.
    pub progress: Option<Box<dyn FnMut(&str, u64) + 'a>>,
    /// When set, every verified page is summarized into this stream.
    pub dump: Option<&'a mut dyn io::Write>,
}

/// A row or duplicate leaf kept pinned until the walker reaches the next
/// routing key, whose value must sort strictly above the leaf's last entry.
pub(crate) struct LastLeaf {
    pub(crate) page: PinnedPage,
    pub(crate) index: PageIndex,
}

/// Rolling state shared by the whole run.
pub(crate) struct VerifyState<'a> {
    pub(crate) fragbits: FragBitmap,
    pub(crate) findings: Findings,
    pub(crate) scratch: ScratchPool,
    pub(crate) leaf: Option<LastLeaf>,
    pub(crate) dump: Option<&'a mut dyn io::Write>,
    pub(crate) progress: Option<Box<dyn FnMut(&str, u64) + 'a>>,
    pub(crate) name: String,
    pub(crate) fcnt: u64,
}

/// Verifies the tree rooted in the descriptor page of `db`'s file.
pub fn verify(db: &Db, opts: VerifyOptions<'_>) -> Result<VerifyReport> {
    let alloc = db.config().alloc_unit as u64;
    let frags = db.file().file_size() / alloc;

    let mut vs = VerifyState {
        fragbits: FragBitmap::new(frags.min(MAX_FRAGS) as u32),
        findings: Findings::new(),
        scratch: ScratchPool::new(),
        leaf: None,
        dump: opts.dump,
        progress: opts.progress,
        name: db.name().to_string(),
        fcnt: 0,
    };

    let outcome = if frags > MAX_FRAGS {
        Err(vs.findings.record(
            FindingKind::FileTooLarge,
            format!("file is too large to verify ({} fragments)", frags),
        ))
    } else {
        run(db, &mut vs)
    };

    // The walk is done; nothing may stay pinned past this point.
    vs.leaf = None;

    if let Some(f) = vs.progress.as_mut() {
        f(&vs.name, vs.fcnt);
    }
    debug!(pages = vs.fcnt, findings = vs.findings.len(), "verification finished");

    match outcome {
        Err(err) if vs.findings.is_empty() => Err(err),
        _ => Ok(VerifyReport {
            success: vs.findings.is_empty(),
            findings: vs.findings.into_vec(),
            pages_visited: vs.fcnt,
        }),
    }
}

fn run(db: &Db, vs: &mut VerifyState<'_>) -> Result<()> {
    let alloc = db.config().alloc_unit;

    // The descriptor page cannot move; holding its pin for the whole walk
    // keeps the root reference valid even if the tree is rewritten under a
    // concurrent open.
    let desc_page = pin_with_retry(db, 0, alloc)?;
    page::verify_page(db, vs, &desc_page)?;

    let desc = DescRecord::read_from_bytes(&desc_page.body()[..DESC_RECORD_SIZE])
        .map_err(|e| eyre::eyre!("failed to read descriptor record: {:?}", e))?;

    let extent = desc.root_addr() as u64 * alloc as u64 + desc.root_size() as u64;
    if extent > db.file().file_size() {
        verify_bail!(
            vs.findings,
            FindingKind::EndOfFile,
            "root reference at addr {} for {} bytes references non-existent file pages",
            desc.root_addr(),
            desc.root_size()
        );
    }
    tree::walk_root(db, vs, desc.root_addr(), desc.root_size())?;

    check_coverage(vs)
}

/// Reports every run of allocation units the traversal never claimed.
fn check_coverage(vs: &mut VerifyState<'_>) -> Result<()> {
    let runs = vs.fragbits.unvisited_runs();
    for &(first, last) in &runs {
        if first == last {
            vs.findings.push(
                FindingKind::MissingCoverage,
                format!("fragment {} was never verified", first),
            );
        } else {
            vs.findings.push(
                FindingKind::MissingCoverage,
                format!("fragments {} to {} were never verified", first, last),
            );
        }
    }
    if let Some(&(first, _)) = runs.first() {
        bail!("fragment {} was never verified", first);
    }
    Ok(())
}

/// Pins a page, transparently re-pinning when the buffer manager reports it
/// relocated. The caller's `(addr, size)` comes from a still-pinned parent,
/// so by the time a retry is requested the reference is already current.
pub(crate) fn pin_with_retry(db: &Db, addr: u32, size: u32) -> Result<PinnedPage> {
    for _ in 0..PIN_RETRY_LIMIT {
        match db.cache().pin(addr, size)? {
            PinOutcome::Pinned(page) => return Ok(page),
            PinOutcome::Retry => continue,
        }
    }
    bail!(
        "page at addr {} kept relocating; giving up after {} pin attempts",
        addr,
        PIN_RETRY_LIMIT
    )
}
