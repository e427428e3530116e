//! # Memory-Mapped File Handle
//!
//! Read-only mmap wrapper for the database file. The verifier never writes,
//! so the map is immutable and shared; all access goes through bounds-checked
//! slicing.

use std::fs::File;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;

#[derive(Debug)]
pub struct MmapFile {
    path: PathBuf,
    _file: File,
    map: Mmap,
    len: u64,
}

impl MmapFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;
        let len = metadata.len();

        ensure!(len > 0, "cannot open empty database file '{}'", path.display());

        // SAFETY: Mmap::map is unsafe because the underlying file can be
        // modified externally while mapped. This is safe because:
        // 1. The verifier runs against a quiescent database file
        // 2. The map is read-only; nothing through this handle mutates it
        // 3. The mmap lifetime is tied to MmapFile, preventing use-after-unmap
        // 4. All access goes through slice(), which bounds-checks offsets
        let map = unsafe {
            Mmap::map(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            map,
            len,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| eyre::eyre!("file offset overflow at {}+{}", offset, len))?;
        ensure!(
            end <= self.len,
            "read of {} bytes at offset {} runs past the end of '{}' ({} bytes)",
            len,
            offset,
            self.path.display(),
            self.len
        );
        let start = offset as usize;
        Ok(&self.map[start..start + len])
    }
}
