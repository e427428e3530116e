//! # On-Disk Page Layout
//!
//! This module defines the bit-exact on-disk structures of the B-tree file:
//! the page header, the descriptor record on page 0, the tagged item format
//! used by variable-format pages, and the off-page and overflow references.
//!
//! ## File Addressing
//!
//! The file is divided into fixed-size allocation units (512 bytes by
//! default). Any on-disk object is identified by an `(address, size)` pair
//! where `address` is an allocation-unit index and `size` is the object's
//! byte length, always a whole multiple of the unit. Byte offset of an
//! object is therefore `address * alloc_unit`.
//!
//! ## Page Header Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  ------------  -----------------------------------------
//! 0       1     page_type     Page flavor (descriptor, row-leaf, ...)
//! 1       1     level         Tree depth; 1 = leaf, 0 = no-level
//! 2       1     flags         Page flags; none currently defined
//! 3       2     unused        Must be zero
//! 5       4     entries       Item/entry count; overflow pages store the
//!                             payload byte length here instead
//! 9       16    lsn           Reserved for log sequence numbers; zero
//! 25      8     start_recno   First record number (column stores)
//! 33      8     records       Records in the subtree rooted at this page
//! 41      23    reserved      Must be zero
//! ```
//!
//! ## Item Layout
//!
//! Variable-format page bodies are a packed sequence of tagged items, each
//! a 4-byte header followed by the payload, padded to 4-byte alignment:
//!
//! ```text
//! +------+-----------+-------------------+---------+
//! | type | len (u24) | payload (len B)   | padding |
//! +------+-----------+-------------------+---------+
//! ```
//!
//! Payload length is fixed for some types: zero for tombstones, the size
//! of [`OvflRef`] for overflow references, the size of [`OffRef`] for
//! off-page references.
//!
//! ## Endianness
//!
//! All multi-byte fields use little-endian encoding. The zerocopy
//! `U16`/`U32`/`U64` wrapper types handle conversion and keep every struct
//! safe to read at any alignment, which matters for mmap-backed access.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    BTREE_MAGIC, BTREE_MAJOR_VERSION, BTREE_MINOR_VERSION, DESC_RECORD_SIZE, ITEM_ALIGN,
    ITEM_HEADER_SIZE, PAGE_HEADER_SIZE,
};
use crate::zerocopy_getters;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid = 0,
    Descriptor = 1,
    ColInternal = 2,
    ColVariable = 3,
    ColFixed = 4,
    ColRcc = 5,
    Overflow = 6,
    RowInternal = 7,
    RowLeaf = 8,
    DupInternal = 9,
    DupLeaf = 10,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => PageType::Descriptor,
            2 => PageType::ColInternal,
            3 => PageType::ColVariable,
            4 => PageType::ColFixed,
            5 => PageType::ColRcc,
            6 => PageType::Overflow,
            7 => PageType::RowInternal,
            8 => PageType::RowLeaf,
            9 => PageType::DupInternal,
            10 => PageType::DupLeaf,
            _ => PageType::Invalid,
        }
    }

    /// Human-readable name used in verification messages.
    pub fn name(self) -> &'static str {
        match self {
            PageType::Invalid => "invalid",
            PageType::Descriptor => "descriptor",
            PageType::ColInternal => "column-internal",
            PageType::ColVariable => "column-variable",
            PageType::ColFixed => "column-fixed",
            PageType::ColRcc => "column-rcc",
            PageType::Overflow => "overflow",
            PageType::RowInternal => "row-internal",
            PageType::RowLeaf => "row-leaf",
            PageType::DupInternal => "duplicate-internal",
            PageType::DupLeaf => "duplicate-leaf",
        }
    }

    /// Whether pages of this type carry a packed item body.
    pub fn has_items(self) -> bool {
        matches!(
            self,
            PageType::ColVariable
                | PageType::RowInternal
                | PageType::RowLeaf
                | PageType::DupInternal
                | PageType::DupLeaf
        )
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    level: u8,
    flags: u8,
    unused: [u8; 2],
    entries: U32,
    lsn: [U64; 2],
    start_recno: U64,
    records: U64,
    reserved: [u8; 23],
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType, level: u8, entries: u32, start_recno: u64, records: u64) -> Self {
        Self {
            page_type: page_type as u8,
            level,
            flags: 0,
            unused: [0; 2],
            entries: U32::new(entries),
            lsn: [U64::new(0); 2],
            start_recno: U64::new(start_recno),
            records: U64::new(records),
            reserved: [0; 23],
        }
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn type_byte(&self) -> u8 {
        self.page_type
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn unused(&self) -> &[u8; 2] {
        &self.unused
    }

    pub fn lsn(&self) -> [u64; 2] {
        [self.lsn[0].get(), self.lsn[1].get()]
    }

    pub fn reserved(&self) -> &[u8] {
        &self.reserved
    }

    /// Overflow pages reuse the entry-count slot for the payload length.
    pub fn datalen(&self) -> u32 {
        self.entries.get()
    }

    zerocopy_getters! {
        entries: u32,
        start_recno: u64,
        records: u64,
    }
}

/// Descriptor record flags. Run-length compression of the column store is
/// the only flag currently defined; it requires a nonzero fixed record
/// length.
pub const DESC_REPEAT: u32 = 0x01;
pub const DESC_FLAGS_MASK: u32 = DESC_REPEAT;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DescRecord {
    magic: U32,
    major: U16,
    minor: U16,
    intlmin: U32,
    intlmax: U32,
    leafmin: U32,
    leafmax: U32,
    fixed_len: U32,
    recno_offset: U64,
    root_addr: U32,
    root_size: U32,
    flags: U32,
    unused: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<DescRecord>() == DESC_RECORD_SIZE);

impl DescRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        intlmin: u32,
        intlmax: u32,
        leafmin: u32,
        leafmax: u32,
        fixed_len: u32,
        flags: u32,
        root_addr: u32,
        root_size: u32,
    ) -> Self {
        Self {
            magic: U32::new(BTREE_MAGIC),
            major: U16::new(BTREE_MAJOR_VERSION),
            minor: U16::new(BTREE_MINOR_VERSION),
            intlmin: U32::new(intlmin),
            intlmax: U32::new(intlmax),
            leafmin: U32::new(leafmin),
            leafmax: U32::new(leafmax),
            fixed_len: U32::new(fixed_len),
            recno_offset: U64::new(0),
            root_addr: U32::new(root_addr),
            root_size: U32::new(root_size),
            flags: U32::new(flags),
            unused: [0; 16],
        }
    }

    pub fn unused(&self) -> &[u8] {
        &self.unused
    }

    zerocopy_getters! {
        magic: u32,
        major: u16,
        minor: u16,
        intlmin: u32,
        intlmax: u32,
        leafmin: u32,
        leafmax: u32,
        fixed_len: u32,
        recno_offset: u64,
        root_addr: u32,
        root_size: u32,
        flags: u32,
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Key = 1,
    KeyOvfl = 2,
    KeyDup = 3,
    KeyDupOvfl = 4,
    Data = 5,
    DataOvfl = 6,
    DataDup = 7,
    DataDupOvfl = 8,
    Del = 9,
    Off = 10,
}

impl ItemType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => ItemType::Key,
            2 => ItemType::KeyOvfl,
            3 => ItemType::KeyDup,
            4 => ItemType::KeyDupOvfl,
            5 => ItemType::Data,
            6 => ItemType::DataOvfl,
            7 => ItemType::DataDup,
            8 => ItemType::DataDupOvfl,
            9 => ItemType::Del,
            10 => ItemType::Off,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ItemType::Key => "key",
            ItemType::KeyOvfl => "key-overflow",
            ItemType::KeyDup => "duplicate-key",
            ItemType::KeyDupOvfl => "duplicate-key-overflow",
            ItemType::Data => "data",
            ItemType::DataOvfl => "data-overflow",
            ItemType::DataDup => "duplicate-data",
            ItemType::DataDupOvfl => "duplicate-data-overflow",
            ItemType::Del => "deleted",
            ItemType::Off => "off-page",
        }
    }

    /// Whether the item's payload is an [`OvflRef`].
    pub fn is_overflow(self) -> bool {
        matches!(
            self,
            ItemType::KeyOvfl | ItemType::KeyDupOvfl | ItemType::DataOvfl | ItemType::DataDupOvfl
        )
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ItemHeader {
    item_type: u8,
    len: [u8; 3],
}

const _: () = assert!(std::mem::size_of::<ItemHeader>() == ITEM_HEADER_SIZE);

impl ItemHeader {
    pub fn new(item_type: ItemType, len: u32) -> Self {
        debug_assert!(len < 1 << 24, "item length exceeds the 24-bit field");
        let le = len.to_le_bytes();
        Self {
            item_type: item_type as u8,
            len: [le[0], le[1], le[2]],
        }
    }

    pub fn type_byte(&self) -> u8 {
        self.item_type
    }

    pub fn item_type(&self) -> Option<ItemType> {
        ItemType::from_byte(self.item_type)
    }

    pub fn len(&self) -> u32 {
        u32::from_le_bytes([self.len[0], self.len[1], self.len[2], 0])
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rounds a page offset up to the item alignment.
pub fn align_item(offset: u64) -> u64 {
    let align = ITEM_ALIGN as u64;
    (offset + align - 1) & !(align - 1)
}

/// Allocated size of the overflow page backing a payload of `datalen`
/// bytes: header plus payload, rounded up to the allocation unit.
pub fn ovfl_page_size(alloc_unit: u32, datalen: u32) -> u64 {
    let alloc = alloc_unit as u64;
    let bytes = PAGE_HEADER_SIZE as u64 + datalen as u64;
    bytes.div_ceil(alloc) * alloc
}

/// Off-page reference: a child subtree and the number of records beneath it.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OffRef {
    records: U64,
    addr: U32,
    size: U32,
}

const _: () = assert!(std::mem::size_of::<OffRef>() == 16);

impl OffRef {
    pub fn new(records: u64, addr: u32, size: u32) -> Self {
        Self {
            records: U64::new(records),
            addr: U32::new(addr),
            size: U32::new(size),
        }
    }

    zerocopy_getters! {
        records: u64,
        addr: u32,
        size: u32,
    }
}

/// Overflow reference. `size` is the payload byte length; the overflow page
/// itself occupies [`ovfl_page_size`] bytes on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OvflRef {
    addr: U32,
    size: U32,
}

const _: () = assert!(std::mem::size_of::<OvflRef>() == 8);

impl OvflRef {
    pub fn new(addr: u32, size: u32) -> Self {
        Self {
            addr: U32::new(addr),
            size: U32::new(size),
        }
    }

    zerocopy_getters! {
        addr: u32,
        size: u32,
    }
}
