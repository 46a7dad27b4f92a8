//! Typed store for trade records.
//!
//! Trades are append-only: created once during settlement, never rewritten.
//! The id → offset index is persisted to `trades.idx` and rebuilt from the
//! data file on any anomaly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

use super::file_store::{DiskOffset, RecordFile};
use super::records::{decode_trade, encode_trade, TRADE_RECORD_SIZE};
use super::sidecar::{self, Cursor, MAX_INDEX_ENTRIES};
use crate::error::StorageError;
use crate::types::{Trade, TradeId};

const IDX_MAGIC: &[u8; 4] = b"TRDX";

pub struct TradeStore {
    file: RecordFile,
    idx_path: PathBuf,
    index: Mutex<HashMap<u64, DiskOffset>>,
}

impl TradeStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let store = Self {
            file: RecordFile::open(dir.join("trades.dat"))?,
            idx_path: dir.join("trades.idx"),
            index: Mutex::new(HashMap::new()),
        };
        let on_disk = store.file.len() / TRADE_RECORD_SIZE as u64;
        let index = match store.load_sidecar() {
            Some(index) if index.len() as u64 == on_disk => {
                info!("loaded trade index: {} trades", index.len());
                index
            }
            Some(index) => {
                warn!(
                    "trade index sidecar is stale ({} entries, {} records on disk), rebuilding",
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

    pub fn persist(&self, trade: &Trade) -> Result<DiskOffset, StorageError> {
        let buf = encode_trade(trade)?;
        let mut index = self.index.lock().expect("lock");
        let offset = self.file.append(&buf)?;
        index.insert(trade.id.0, offset);
        Ok(offset)
    }

    pub fn load(&self, offset: DiskOffset) -> Result<Trade, StorageError> {
        let mut buf = [0u8; TRADE_RECORD_SIZE];
        self.file.read_at(offset, &mut buf)?;
        decode_trade(&buf)
    }

    pub fn load_by_id(&self, id: TradeId) -> Result<Option<Trade>, StorageError> {
        let offset = self.index.lock().expect("lock").get(&id.0).copied();
        match offset {
            Some(offset) => Ok(Some(self.load(offset)?)),
            None => Ok(None),
        }
    }

    /// Every trade on disk, in id order.
    pub fn load_all(&self) -> Result<Vec<Trade>, StorageError> {
        let mut pairs: Vec<(u64, DiskOffset)> = {
            let index = self.index.lock().expect("lock");
            index.iter().map(|(id, off)| (*id, *off)).collect()
        };
        pairs.sort_unstable_by_key(|(id, _)| *id);
        let mut out = Vec::with_capacity(pairs.len());
        for (_, offset) in pairs {
            out.push(self.load(offset)?);
        }
        Ok(out)
    }

    /// Trades where `user_id` was buyer or seller, in id order.
    pub fn load_for_user(&self, user_id: &str) -> Result<Vec<Trade>, StorageError> {
        let mut out = self.load_all()?;
        out.retain(|t| t.buy_user_id == user_id || t.sell_user_id == user_id);
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.index.lock().expect("lock").len()
    }

    /// Highest trade id on disk (0 when empty).
    pub fn max_id(&self) -> u64 {
        self.index
            .lock()
            .expect("lock")
            .keys()
            .copied()
            .max()
            .unwrap_or(0)
    }

    pub fn save_index(&self) -> Result<(), StorageError> {
        let mut out = Vec::new();
        out.extend_from_slice(IDX_MAGIC);
        let index = self.index.lock().expect("lock");
        sidecar::push_u64(&mut out, index.len() as u64);
        for (id, offset) in index.iter() {
            sidecar::push_i32(&mut out, *id as i32);
            sidecar::push_u64(&mut out, offset.stored());
        }
        drop(index);
        std::fs::write(&self.idx_path, out)?;
        Ok(())
    }

    fn load_sidecar(&self) -> Option<HashMap<u64, DiskOffset>> {
        let raw = std::fs::read(&self.idx_path).ok()?;
        let mut cur = Cursor::new(&raw);
        if cur.bytes(4)? != IDX_MAGIC {
            warn!("trade index sidecar has bad magic, rebuilding");
            return None;
        }
        let count = cur.u64()?;
        if count > MAX_INDEX_ENTRIES {
            warn!("trade index sidecar count {count} is implausible, rebuilding");
            return None;
        }
        let mut index = HashMap::new();
        for _ in 0..count {
            let id = u64::try_from(cur.i32()?).ok()?;
            let offset = DiskOffset::from_stored(cur.u64()?)?;
            index.insert(id, offset);
        }
        Some(index)
    }

    fn rebuild_index(&self) -> Result<HashMap<u64, DiskOffset>, StorageError> {
        let mut index = HashMap::new();
        let record = TRADE_RECORD_SIZE as u64;
        let len = self.file.len();
        let mut raw = 0u64;
        let mut buf = [0u8; TRADE_RECORD_SIZE];
        while raw + record <= len {
            let offset = DiskOffset::from_raw(raw);
            self.file.read_at(offset, &mut buf)?;
            match decode_trade(&buf) {
                Ok(trade) if trade.id.0 != 0 => {
                    index.insert(trade.id.0, offset);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("trade data file: stopping rebuild at offset {raw}: {err}");
                    break;
                }
            }
            raw += record;
        }
        info!("rebuilt trade index: {} trades", index.len());
        Ok(index)
    }
}
