//! Typed store for user records.
//!
//! Users append to `users.dat` and are rewritten in place on every balance
//! or holdings change. The id → offset index is persisted to `users.idx`
//! and rebuilt from the data file on any anomaly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

use super::file_store::{DiskOffset, RecordFile};
use super::records::{decode_user, encode_user, USER_RECORD_SIZE};
use super::sidecar::{self, Cursor, MAX_INDEX_ENTRIES};
use crate::error::StorageError;
use crate::types::User;

const IDX_MAGIC: &[u8; 4] = b"USRX";
const CACHE_PAGES: usize = 32;

pub struct UserStore {
    file: RecordFile,
    idx_path: PathBuf,
    index: Mutex<HashMap<String, DiskOffset>>,
}

impl UserStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let store = Self {
            file: RecordFile::open_cached(dir.join("users.dat"), CACHE_PAGES)?,
            idx_path: dir.join("users.idx"),
            index: Mutex::new(HashMap::new()),
        };
        let on_disk = store.file.len() / USER_RECORD_SIZE as u64;
        let index = match store.load_sidecar() {
            Some(index) if index.len() as u64 == on_disk => {
                info!("loaded user index: {} users", index.len());
                index
            }
            Some(index) => {
                warn!(
                    "user index sidecar is stale ({} entries, {} records on disk), rebuilding",
                    index.len(),
                    on_disk
                );
                store.rebuild_index()?
            }
            None => store.rebuild_index()?,
        };
        *store.index.lock().expect("lock") = index;
        Ok(store)
    }

    /// Append a new user record and register its offset.
    pub fn persist(&self, user: &User) -> Result<DiskOffset, StorageError> {
        let buf = encode_user(user)?;
        let mut index = self.index.lock().expect("lock");
        let offset = self.file.append(&buf)?;
        index.insert(user.id().to_string(), offset);
        Ok(offset)
    }

    pub fn load(&self, offset: DiskOffset) -> Result<User, StorageError> {
        let mut buf = vec![0u8; USER_RECORD_SIZE];
        self.file.read_at(offset, &mut buf)?;
        decode_user(&buf)
    }

    pub fn offset_of(&self, user_id: &str) -> Option<DiskOffset> {
        self.index.lock().expect("lock").get(user_id).copied()
    }

    pub fn exists(&self, user_id: &str) -> bool {
        self.index.lock().expect("lock").contains_key(user_id)
    }

    pub fn load_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        match self.offset_of(user_id) {
            Some(offset) => Ok(Some(self.load(offset)?)),
            None => Ok(None),
        }
    }

    /// Rewrite the user's record in place; falls back to a fresh append
    /// for a user not seen before.
    pub fn update(&self, user: &User) -> Result<(), StorageError> {
        match self.offset_of(user.id()) {
            Some(offset) => {
                let buf = encode_user(user)?;
                self.file.write_at(offset, &buf)
            }
            None => self.persist(user).map(|_| ()),
        }
    }

    /// Every user on disk, sorted by id.
    pub fn load_all(&self) -> Result<Vec<User>, StorageError> {
        let mut pairs: Vec<(String, DiskOffset)> = {
            let index = self.index.lock().expect("lock");
            index.iter().map(|(id, off)| (id.clone(), *off)).collect()
        };
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let mut out = Vec::with_capacity(pairs.len());
        for (_, offset) in pairs {
            out.push(self.load(offset)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.index.lock().expect("lock").len()
    }

    pub fn save_index(&self) -> Result<(), StorageError> {
        let mut out = Vec::new();
        out.extend_from_slice(IDX_MAGIC);
        let index = self.index.lock().expect("lock");
        sidecar::push_u64(&mut out, index.len() as u64);
        for (id, offset) in index.iter() {
            sidecar::push_string(&mut out, id);
            sidecar::push_u64(&mut out, offset.stored());
        }
        drop(index);
        std::fs::write(&self.idx_path, out)?;
        Ok(())
    }

    fn load_sidecar(&self) -> Option<HashMap<String, DiskOffset>> {
        let raw = std::fs::read(&self.idx_path).ok()?;
        let mut cur = Cursor::new(&raw);
        if cur.bytes(4)? != IDX_MAGIC {
            warn!("user index sidecar has bad magic, rebuilding");
            return None;
        }
        let count = cur.u64()?;
        if count > MAX_INDEX_ENTRIES {
            warn!("user index sidecar count {count} is implausible, rebuilding");
            return None;
        }
        let mut index = HashMap::new();
        for _ in 0..count {
            let id = cur.string()?;
            let offset = DiskOffset::from_stored(cur.u64()?)?;
            index.insert(id, offset);
        }
        Some(index)
    }

    fn rebuild_index(&self) -> Result<HashMap<String, DiskOffset>, StorageError> {
        let mut index = HashMap::new();
        let record = USER_RECORD_SIZE as u64;
        let len = self.file.len();
        let mut raw = 0u64;
        let mut buf = vec![0u8; USER_RECORD_SIZE];
        while raw + record <= len {
            let offset = DiskOffset::from_raw(raw);
            self.file.read_at(offset, &mut buf)?;
            match decode_user(&buf) {
                Ok(user) if !user.id().is_empty() => {
                    index.insert(user.id().to_string(), offset);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("user data file: stopping rebuild at offset {raw}: {err}");
                    break;
                }
            }
            raw += record;
        }
        info!("rebuilt user index: {} users", index.len());
        Ok(index)
    }
}
