//! # Database Handle
//!
//! [`Db`] owns what the verifier needs from an opened database: the mapped
//! file, the page cache over it, and the configured format parameters the
//! descriptor record is checked against. Comparators and decoders are
//! pluggable the way the engine configures them per database: a byte
//! comparator for row keys, a second one for duplicate values, and optional
//! decoders when keys or values are stored in a compressed form.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result};
use tracing::debug;

use crate::config::{DEFAULT_ALLOC_UNIT, DESC_RECORD_SIZE, PAGE_HEADER_SIZE};
use crate::session::VerifyReport;
use crate::storage::{MmapFile, PageCache};
use crate::verify::{self, VerifyOptions};

/// Key ordering hook. The default compares raw bytes lexicographically.
pub type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Decodes a stored key or value into its comparable form.
pub trait Decoder: Send + Sync {
    fn decode(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()>;
}

#[derive(Clone)]
pub struct DbConfig {
    /// File allocation unit in bytes; page addresses index these units.
    pub alloc_unit: u32,
    /// Configured internal page size range.
    pub intlmin: u32,
    pub intlmax: u32,
    /// Configured leaf page size range.
    pub leafmin: u32,
    pub leafmax: u32,
    /// Fixed record length for column-fixed stores; zero means variable.
    pub fixed_len: u32,
    /// Whether the column store run-length compresses repeated records.
    pub repeat_compression: bool,
    pub key_comparator: Comparator,
    pub dup_comparator: Comparator,
    pub key_decoder: Option<Arc<dyn Decoder>>,
    pub data_decoder: Option<Arc<dyn Decoder>>,
}

impl Default for DbConfig {
    fn default() -> Self {
        let bytewise: Comparator = Arc::new(|a: &[u8], b: &[u8]| a.cmp(b));
        Self {
            alloc_unit: DEFAULT_ALLOC_UNIT,
            intlmin: 512,
            intlmax: 16_384,
            leafmin: 512,
            leafmax: 16_384,
            fixed_len: 0,
            repeat_compression: false,
            key_comparator: Arc::clone(&bytewise),
            dup_comparator: bytewise,
            key_decoder: None,
            data_decoder: None,
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("alloc_unit", &self.alloc_unit)
            .field("intlmin", &self.intlmin)
            .field("intlmax", &self.intlmax)
            .field("leafmin", &self.leafmin)
            .field("leafmax", &self.leafmax)
            .field("fixed_len", &self.fixed_len)
            .field("repeat_compression", &self.repeat_compression)
            .field("key_decoder", &self.key_decoder.is_some())
            .field("data_decoder", &self.data_decoder.is_some())
            .finish()
    }
}

pub struct Db {
    config: DbConfig,
    file: Arc<MmapFile>,
    cache: PageCache,
    name: String,
}

impl Db {
    /// Opens a database file read-only for verification.
    pub fn open<P: AsRef<Path>>(path: P, config: DbConfig) -> Result<Self> {
        ensure!(
            config.alloc_unit as usize >= PAGE_HEADER_SIZE + DESC_RECORD_SIZE
                && config.alloc_unit.is_power_of_two(),
            "allocation unit {} must be a power of two large enough for the descriptor page",
            config.alloc_unit
        );
        ensure!(
            !config.repeat_compression || config.fixed_len > 0,
            "repeat counts configured but no fixed length record size specified"
        );

        let file = Arc::new(MmapFile::open(path)?);
        let name = file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string());
        debug!(name = %name, size = file.file_size(), "opened database for verification");

        let cache = PageCache::new(Arc::clone(&file), config.alloc_unit);
        Ok(Self {
            config,
            file,
            cache,
            name,
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn file(&self) -> &MmapFile {
        &self.file
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Verifies the structure of the whole tree. See [`crate::verify`].
    pub fn verify(&self, opts: VerifyOptions<'_>) -> Result<VerifyReport> {
        verify::verify(self, opts)
    }

    /// Marks a cached page relocated so the next pin of it observes the
    /// retry signal once. Debug hook for exercising the re-pin path.
    pub fn debug_mark_relocated(&self, addr: u32) {
        self.cache.mark_relocated(addr);
    }
}
