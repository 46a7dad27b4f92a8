//! Engine metadata: id counters and totals, one record at offset 0.
//!
//! Loading an absent or short file yields defaults (fresh venue); saving
//! always overwrites in place.

use std::path::Path;

use log::warn;

use super::file_store::{DiskOffset, RecordFile};
use super::records::{decode_metadata, encode_metadata, Metadata, METADATA_SIZE};
use crate::error::StorageError;

pub struct MetadataStore {
    file: RecordFile,
}

impl MetadataStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            file: RecordFile::open(dir.join("metadata.dat"))?,
        })
    }

    pub fn load(&self) -> Result<Metadata, StorageError> {
        if self.file.len() < METADATA_SIZE as u64 {
            return Ok(Metadata::default());
        }
        let mut buf = [0u8; METADATA_SIZE];
        self.file.read_at(DiskOffset::from_raw(0), &mut buf)?;
        match decode_metadata(&buf) {
            Ok(meta) => Ok(meta),
            Err(err) => {
                warn!("metadata record is unreadable ({err}), starting from defaults");
                Ok(Metadata::default())
            }
        }
    }

    pub fn save(&self, meta: &Metadata) -> Result<(), StorageError> {
        let buf = encode_metadata(meta)?;
        if self.file.len() < METADATA_SIZE as u64 {
            self.file.append(&buf)?;
        } else {
            self.file.write_at(DiskOffset::from_raw(0), &buf)?;
        }
        Ok(())
    }
}
