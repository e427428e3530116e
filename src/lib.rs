//! # birchdb - Embedded B-Tree Storage Engine Verifier
//!
//! birchdb models the on-disk format of a B-tree key/value storage engine
//! and ships the component that understands all of it in one place: the
//! offline structural verifier. Given a database file and the handle's
//! configuration, [`Db::verify`] walks every page reachable from the root,
//! validates each page's encoding, checks key ordering within pages and
//! across parent/child boundaries, and confirms that every allocation unit
//! of the file is claimed by exactly one reachable page.
//!
//! ## Quick Start
//!
//! ```ignore
//! use birchdb::{Db, DbConfig, VerifyOptions};
//!
//! let db = Db::open("./data.db", DbConfig::default())?;
//! let report = db.verify(VerifyOptions::default())?;
//! for finding in &report.findings {
//!     eprintln!("{}: {}", finding.kind, finding.message);
//! }
//! assert!(report.success);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (Db, verify)         │
//! ├─────────────────────────────────────┤
//! │  Verifier (tree walk, item walk,     │
//! │  page validators, coverage bitmap)   │
//! ├─────────────────────────────────────┤
//! │  B-tree format (page header, items,  │
//! │  descriptor, in-memory page index)   │
//! ├─────────────────────────────────────┤
//! │  Storage (page cache with pins,      │
//! │  memory-mapped file I/O)             │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! The file is addressed in fixed allocation units (512 bytes by default).
//! Page 0 is the descriptor: database-wide format parameters plus the root
//! reference. Every other reachable page is a row-store, column-store,
//! duplicate-tree, or overflow page; see [`btree`] for the exact layouts.
//!
//! ## Module Overview
//!
//! - [`btree`]: on-disk page formats and the in-memory page index
//! - [`storage`]: memory-mapped file access and the pin-counted page cache
//! - [`verify`]: the structural verifier
//! - [`session`]: findings sink, report types, scratch-buffer pool

mod macros;

pub mod btree;
pub mod config;
pub mod db;
pub mod session;
pub mod storage;
pub mod verify;

pub use db::{Comparator, Db, DbConfig, Decoder};
pub use session::{Finding, FindingKind, VerifyReport};
pub use verify::VerifyOptions;
