//! On-disk tree fixture for the verification scenario tests.
//!
//! `TreeBuilder` assembles a database file page by page at allocation-unit
//! addresses, with helpers for each page flavor that derive the header
//! bookkeeping (entry counts, record counts) from the content handed in.
//! Corruptions are produced by handing in the corrupt content directly;
//! nothing here sorts, validates, or repairs.

#![allow(dead_code)]

use birchdb::btree::{
    ovfl_page_size, DescRecord, ItemHeader, ItemType, OffRef, PageHeader, PageType, DESC_REPEAT,
};
use birchdb::config::{LEAF_LEVEL, NO_LEVEL, PAGE_HEADER_SIZE};
use birchdb::{Db, DbConfig};
use zerocopy::IntoBytes;

pub const ALLOC: u32 = 512;

pub fn items_body(items: &[(ItemType, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (ty, payload) in items {
        body.extend_from_slice(ItemHeader::new(*ty, payload.len() as u32).as_bytes());
        body.extend_from_slice(payload);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }
    body
}

pub fn page_bytes(size_units: u32, header: PageHeader, body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; (size_units * ALLOC) as usize];
    bytes[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());
    bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + body.len()].copy_from_slice(body);
    bytes
}

#[derive(Default)]
pub struct TreeBuilder {
    bytes: Vec<u8>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes raw page bytes at an allocation-unit address, growing the
    /// file as needed.
    pub fn place(&mut self, addr: u32, page: &[u8]) {
        let off = (addr * ALLOC) as usize;
        if self.bytes.len() < off + page.len() {
            self.bytes.resize(off + page.len(), 0);
        }
        self.bytes[off..off + page.len()].copy_from_slice(page);
    }

    /// Grows the file to `units` allocation units without placing a page.
    pub fn pad_to(&mut self, units: u32) {
        let len = (units * ALLOC) as usize;
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    /// Descriptor page at address 0 matching `config`, rooting the tree at
    /// `(root_addr, root_size)`.
    pub fn desc(&mut self, config: &DbConfig, root_addr: u32, root_size: u32) {
        let flags = if config.repeat_compression { DESC_REPEAT } else { 0 };
        self.desc_record(DescRecord::new(
            config.intlmin,
            config.intlmax,
            config.leafmin,
            config.leafmax,
            config.fixed_len,
            flags,
            root_addr,
            root_size,
        ));
    }

    /// Descriptor page built from an explicit record, for mismatch tests.
    pub fn desc_record(&mut self, record: DescRecord) {
        let header = PageHeader::new(PageType::Descriptor, NO_LEVEL, 0, 0, 0);
        let mut page = page_bytes(1, header, &[]);
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + record.as_bytes().len()]
            .copy_from_slice(record.as_bytes());
        self.place(0, &page);
    }

    /// A one-unit page of tagged items with explicit header bookkeeping.
    pub fn items_page(
        &mut self,
        addr: u32,
        page_type: PageType,
        level: u8,
        start_recno: u64,
        records: u64,
        items: &[(ItemType, Vec<u8>)],
    ) {
        let header = PageHeader::new(page_type, level, items.len() as u32, start_recno, records);
        let page = page_bytes(1, header, &items_body(items));
        self.place(addr, &page);
    }

    /// Row leaf of key/data pairs, in the order given.
    pub fn row_leaf(&mut self, addr: u32, pairs: &[(&str, &str)]) {
        let mut items = Vec::new();
        for (key, data) in pairs {
            items.push((ItemType::Key, key.as_bytes().to_vec()));
            items.push((ItemType::Data, data.as_bytes().to_vec()));
        }
        self.items_page(
            addr,
            PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            pairs.len() as u64,
            &items,
        );
    }

    /// Row internal page of routing entries, records summed from them.
    pub fn row_internal(&mut self, addr: u32, level: u8, entries: &[(&str, OffRef)]) {
        let mut items = Vec::new();
        let mut records = 0;
        for (key, off) in entries {
            records += off.records();
            items.push((ItemType::Key, key.as_bytes().to_vec()));
            items.push((ItemType::Off, off.as_bytes().to_vec()));
        }
        self.items_page(addr, PageType::RowInternal, level, 0, records, &items);
    }

    /// Duplicate leaf of values, in the order given.
    pub fn dup_leaf(&mut self, addr: u32, values: &[&str]) {
        let items: Vec<_> = values
            .iter()
            .map(|v| (ItemType::DataDup, v.as_bytes().to_vec()))
            .collect();
        self.items_page(
            addr,
            PageType::DupLeaf,
            LEAF_LEVEL,
            0,
            values.len() as u64,
            &items,
        );
    }

    /// Duplicate internal page of routing entries.
    pub fn dup_internal(&mut self, addr: u32, level: u8, entries: &[(&str, OffRef)]) {
        let mut items = Vec::new();
        let mut records = 0;
        for (key, off) in entries {
            records += off.records();
            items.push((ItemType::KeyDup, key.as_bytes().to_vec()));
            items.push((ItemType::Off, off.as_bytes().to_vec()));
        }
        self.items_page(addr, PageType::DupInternal, level, 0, records, &items);
    }

    /// Overflow page sized for `payload`, zero padding included. The
    /// declared data length can be overridden to disagree with the
    /// reference that points here.
    pub fn overflow(&mut self, addr: u32, payload: &[u8]) {
        self.overflow_claiming(addr, payload, payload.len() as u32);
    }

    pub fn overflow_claiming(&mut self, addr: u32, payload: &[u8], datalen: u32) {
        let size = ovfl_page_size(ALLOC, payload.len() as u32);
        let header = PageHeader::new(PageType::Overflow, LEAF_LEVEL, datalen, 0, 0);
        let mut page = vec![0u8; size as usize];
        page[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        self.place(addr, &page);
    }

    /// Column-fixed page; every record must be `fixed_len` bytes.
    pub fn col_fix(&mut self, addr: u32, start_recno: u64, records: &[Vec<u8>]) {
        let mut body = Vec::new();
        for record in records {
            body.extend_from_slice(record);
        }
        let header = PageHeader::new(
            PageType::ColFixed,
            LEAF_LEVEL,
            records.len() as u32,
            start_recno,
            records.len() as u64,
        );
        let page = page_bytes(1, header, &body);
        self.place(addr, &page);
    }

    /// Column-rcc page of `(repeat, record)` runs.
    pub fn col_rcc(&mut self, addr: u32, start_recno: u64, entries: &[(u16, Vec<u8>)]) {
        let mut body = Vec::new();
        let mut records = 0u64;
        for (repeat, record) in entries {
            records += *repeat as u64;
            body.extend_from_slice(&repeat.to_le_bytes());
            body.extend_from_slice(record);
        }
        let header = PageHeader::new(
            PageType::ColRcc,
            LEAF_LEVEL,
            entries.len() as u32,
            start_recno,
            records,
        );
        let page = page_bytes(1, header, &body);
        self.place(addr, &page);
    }

    /// Column internal page of child references.
    pub fn col_internal(&mut self, addr: u32, level: u8, start_recno: u64, entries: &[OffRef]) {
        let mut body = Vec::new();
        let mut records = 0;
        for off in entries {
            records += off.records();
            body.extend_from_slice(off.as_bytes());
        }
        let header = PageHeader::new(
            PageType::ColInternal,
            level,
            entries.len() as u32,
            start_recno,
            records,
        );
        let page = page_bytes(1, header, &body);
        self.place(addr, &page);
    }

    /// Writes the file into a temp dir and opens it for verification.
    pub fn open(&self, config: DbConfig) -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verify.db");
        std::fs::write(&path, &self.bytes).unwrap();
        let db = Db::open(&path, config).unwrap();
        (dir, db)
    }
}
