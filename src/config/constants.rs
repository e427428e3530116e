//! # Engine Configuration Constants
//!
//! This module centralizes the on-disk and runtime constants, grouping
//! interdependent values together. Constants that depend on each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_ALLOC_UNIT (512 bytes)
//!       │
//!       ├─> Every page address is an allocation-unit index; every page
//!       │   size is a whole multiple of the unit.
//!       │
//!       ├─> The descriptor page occupies exactly one allocation unit at
//!       │   address 0.
//!       │
//!       └─> MAX_FRAGS bounds the coverage bitmap: addresses are u32
//!           unit indexes, so a file may hold at most u32::MAX units
//!           (2 TB at the default unit).
//!
//! PAGE_HEADER_SIZE (64 bytes)
//!       │
//!       ├─> Item storage begins at this offset on every page.
//!       │
//!       └─> DESC_RECORD_SIZE (64 bytes) immediately follows it on the
//!           descriptor page; both must fit in one allocation unit.
//!
//! ITEM_ALIGN (4 bytes)
//!       │
//!       └─> ITEM_HEADER_SIZE (4 bytes): item headers are themselves one
//!           alignment quantum, so aligned items keep headers aligned.
//! ```

/// Default file allocation unit in bytes. Page addresses are indexes of
/// these units and page sizes are whole multiples of it.
pub const DEFAULT_ALLOC_UNIT: u32 = 512;

/// Size of the fixed page header at the start of every page.
pub const PAGE_HEADER_SIZE: usize = 64;

/// Size of the descriptor record stored in the body of page 0.
pub const DESC_RECORD_SIZE: usize = 64;

/// Magic number of the descriptor record.
pub const BTREE_MAGIC: u32 = 0x4252_4348;

/// On-disk format version.
pub const BTREE_MAJOR_VERSION: u16 = 1;
pub const BTREE_MINOR_VERSION: u16 = 0;

/// Level sentinel that cannot occur on any tree page. The descriptor page
/// carries it, and the tree walker passes it to mean "this is the root;
/// adopt the tree height from the page itself".
pub const NO_LEVEL: u8 = 0;

/// Level of every leaf and overflow page. Internal pages are strictly
/// greater.
pub const LEAF_LEVEL: u8 = 1;

/// Size of the item header: type byte plus 24-bit length.
pub const ITEM_HEADER_SIZE: usize = 4;

/// Items are packed with this alignment.
pub const ITEM_ALIGN: usize = 4;

/// Marker byte identifying a tombstone in fixed-length column entries. A
/// tombstone's remaining bytes must all be zero.
pub const FIX_DELETE_BYTE: u8 = 0x01;

/// Largest repeat count a run-length-compressed column entry can carry.
pub const RCC_REPEAT_MAX: u16 = u16::MAX;

/// Size of the repeat-count prefix on a run-length-compressed entry.
pub const RCC_REPEAT_SIZE: usize = 2;

/// Most fragments the coverage bitmap will track. Page addresses are u32
/// allocation-unit indexes, so a file with more units than this cannot be
/// addressed and verification fails up front with file-too-large.
pub const MAX_FRAGS: u64 = u32::MAX as u64;

/// Bounded retry budget for pinning a page the buffer manager reports as
/// relocated.
pub const PIN_RETRY_LIMIT: usize = 16;

/// The verifier invokes the progress callback every this many pages.
pub const PROGRESS_INTERVAL: u64 = 10;

/// The page cache sweeps unpinned entries once its table grows past this
/// many pages.
pub const PAGE_CACHE_SWEEP_THRESHOLD: usize = 1024;

const _: () = assert!(ITEM_ALIGN.is_power_of_two());
const _: () = assert!(ITEM_HEADER_SIZE == ITEM_ALIGN);
const _: () = assert!(PAGE_HEADER_SIZE + DESC_RECORD_SIZE <= DEFAULT_ALLOC_UNIT as usize);
const _: () = assert!((LEAF_LEVEL as usize) > (NO_LEVEL as usize));
