//! # Verification Session State
//!
//! Per-run ambient state: the reusable scratch-buffer pool and the findings
//! sink that accumulates every structural problem a run reports.
//!
//! ## Error Surface
//!
//! Validators report a problem into the [`Findings`] sink and then unwind
//! with an `eyre` error carrying the same message. The sink therefore holds
//! every message produced before the traversal stopped, in order; the first
//! entry is the error the run returns. Page-local validators may push
//! several findings before unwinding (the descriptor check reports each
//! mismatched field), so the sink can be longer than one even for a single
//! failed page.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Pool of reusable byte buffers for decoded keys and values.
///
/// Buffers return to the pool when their guard drops, so the item walker's
/// per-slot scratch is allocated once per page walk at most.
#[derive(Clone, Default)]
pub struct ScratchPool {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> ScratchBuf {
        let buf = self.inner.lock().pop().unwrap_or_default();
        ScratchBuf {
            buf: ManuallyDrop::new(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.inner.lock().len()
    }
}

/// A pooled scratch buffer; clears itself and returns to the pool on drop.
pub struct ScratchBuf {
    buf: ManuallyDrop<Vec<u8>>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Deref for ScratchBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for ScratchBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for ScratchBuf {
    fn drop(&mut self) {
        // SAFETY: the buffer is taken exactly once, here, and self is not
        // used afterwards.
        let mut buf = unsafe { ManuallyDrop::take(&mut self.buf) };
        buf.clear();
        self.pool.lock().push(buf);
    }
}

/// The distinguishable classes of structural problem a run can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    FileTooLarge,
    EndOfPage,
    EndOfFile,
    DuplicateCoverage,
    MissingCoverage,
    ItemMismatch,
    BadLength,
    IllegalType,
    BadHeader,
    DescriptorMismatch,
    BadDeleteFormat,
    BadRccCount,
    MisorderedItems,
    BoundaryViolation,
    LevelMismatch,
    RecordCountMismatch,
    StartRecnoMismatch,
    OverflowSizeMismatch,
    OverflowEmpty,
    OverflowTrailingGarbage,
}

impl FindingKind {
    pub fn name(self) -> &'static str {
        match self {
            FindingKind::FileTooLarge => "file-too-large",
            FindingKind::EndOfPage => "end-of-page",
            FindingKind::EndOfFile => "end-of-file",
            FindingKind::DuplicateCoverage => "duplicate-coverage",
            FindingKind::MissingCoverage => "missing-coverage",
            FindingKind::ItemMismatch => "type/page-mismatch",
            FindingKind::BadLength => "bad-length",
            FindingKind::IllegalType => "illegal-type",
            FindingKind::BadHeader => "bad-header",
            FindingKind::DescriptorMismatch => "descriptor-mismatch",
            FindingKind::BadDeleteFormat => "bad-delete-format",
            FindingKind::BadRccCount => "bad-rcc-count",
            FindingKind::MisorderedItems => "misordered-items",
            FindingKind::BoundaryViolation => "boundary-violation",
            FindingKind::LevelMismatch => "level-mismatch",
            FindingKind::RecordCountMismatch => "record-count-mismatch",
            FindingKind::StartRecnoMismatch => "start-recno-mismatch",
            FindingKind::OverflowSizeMismatch => "overflow-size-mismatch",
            FindingKind::OverflowEmpty => "overflow-empty",
            FindingKind::OverflowTrailingGarbage => "overflow-trailing-garbage",
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
}

/// Accumulating sink for findings.
#[derive(Debug, Default)]
pub struct Findings {
    items: Vec<Finding>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: FindingKind, message: String) {
        self.items.push(Finding { kind, message });
    }

    /// Records a finding and hands back the matching error for unwinding.
    pub fn record(&mut self, kind: FindingKind, message: String) -> eyre::Report {
        let err = eyre::eyre!("{}: {}", kind, message);
        self.push(kind, message);
        err
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.items
    }
}

/// Result of one verification run.
///
/// `success` is true when no finding was recorded; otherwise the findings
/// hold every message produced before the traversal unwound, first error
/// first.
#[derive(Debug)]
pub struct VerifyReport {
    pub success: bool,
    pub findings: Vec<Finding>,
    pub pages_visited: u64,
}
