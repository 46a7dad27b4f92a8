//! Listed-symbol registry: a flat file of NUL-terminated strings.
//!
//! Symbols are appended once and never removed. Lookups re-read the file,
//! keeping disk the single source of truth.

use std::path::Path;

use super::file_store::{DiskOffset, RecordFile};
use crate::error::StorageError;

pub struct SymbolStore {
    file: RecordFile,
}

impl SymbolStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            file: RecordFile::open(dir.join("symbols.dat"))?,
        })
    }

    /// Append a symbol if not already listed. Returns whether it was added.
    pub fn add(&self, symbol: &str) -> Result<bool, StorageError> {
        if self.contains(symbol)? {
            return Ok(false);
        }
        let mut bytes = symbol.as_bytes().to_vec();
        bytes.push(0);
        self.file.append(&bytes)?;
        Ok(true)
    }

    pub fn contains(&self, symbol: &str) -> Result<bool, StorageError> {
        Ok(self.load_all()?.iter().any(|s| s == symbol))
    }

    /// All listed symbols, in listing order.
    pub fn load_all(&self) -> Result<Vec<String>, StorageError> {
        let len = self.file.len() as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; len];
        self.file.read_at(DiskOffset::from_raw(0), &mut buf)?;
        Ok(buf
            .split(|&b| b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        Ok(self.load_all()?.len())
    }
}
