//! Typed store for order records.
//!
//! Orders append to `orders.dat` and are rewritten in place on fills and
//! cancels. Three in-memory indexes (id → offset, symbol → ids, user → ids)
//! are persisted to the `orders.idx` sidecar on close and rebuilt by
//! scanning the data file whenever the sidecar is missing or fails a sanity
//! check.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

use super::file_store::{DiskOffset, RecordFile};
use super::records::{decode_order, encode_order, ORDER_RECORD_SIZE};
use super::sidecar::{self, Cursor, MAX_INDEX_ENTRIES};
use crate::error::StorageError;
use crate::types::{Order, OrderId};

const IDX_MAGIC: &[u8; 4] = b"ORDX";
const CACHE_PAGES: usize = 64;

#[derive(Default)]
struct OrderIndex {
    by_id: HashMap<u64, DiskOffset>,
    by_symbol: HashMap<String, Vec<u64>>,
    by_user: HashMap<String, Vec<u64>>,
}

impl OrderIndex {
    fn insert(&mut self, order: &Order, offset: DiskOffset) {
        self.by_id.insert(order.id.0, offset);
        self.by_symbol
            .entry(order.symbol.clone())
            .or_default()
            .push(order.id.0);
        self.by_user
            .entry(order.user_id.clone())
            .or_default()
            .push(order.id.0);
    }
}

pub struct OrderStore {
    file: RecordFile,
    idx_path: PathBuf,
    index: Mutex<OrderIndex>,
}

impl OrderStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let store = Self {
            file: RecordFile::open_cached(dir.join("orders.dat"), CACHE_PAGES)?,
            idx_path: dir.join("orders.idx"),
            index: Mutex::new(OrderIndex::default()),
        };
        let on_disk = store.file.len() / ORDER_RECORD_SIZE as u64;
        let index = match store.load_sidecar() {
            // A well-formed sidecar can still predate the last appends
            // (crash before the shutdown flush); entry count must match
            // the data file exactly.
            Some(index) if index.by_id.len() as u64 == on_disk => {
                info!("loaded order index: {} orders", index.by_id.len());
                index
            }
            Some(index) => {
                warn!(
                    "order index sidecar is stale ({} entries, {} records on disk), rebuilding",
                    index.by_id.len(),
                    on_disk
                );
                store.rebuild_index()?
            }
            None => store.rebuild_index()?,
        };
        *store.index.lock().expect("lock") = index;
        Ok(store)
    }

    /// Append a new order record and register it in every index.
    pub fn persist(&self, order: &Order) -> Result<DiskOffset, StorageError> {
        let buf = encode_order(order)?;
        let mut index = self.index.lock().expect("lock");
        let offset = self.file.append(&buf)?;
        index.insert(order, offset);
        Ok(offset)
    }

    /// Rewrite an existing record in place. Indexes are unchanged.
    pub fn update(&self, order: &Order, offset: DiskOffset) -> Result<(), StorageError> {
        let buf = encode_order(order)?;
        self.file.write_at(offset, &buf)
    }

    pub fn load(&self, offset: DiskOffset) -> Result<Order, StorageError> {
        let mut buf = [0u8; ORDER_RECORD_SIZE];
        self.file.read_at(offset, &mut buf)?;
        decode_order(&buf)
    }

    pub fn offset_of(&self, id: OrderId) -> Option<DiskOffset> {
        self.index.lock().expect("lock").by_id.get(&id.0).copied()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.lock().expect("lock").by_id.contains_key(&id.0)
    }

    pub fn load_by_id(&self, id: OrderId) -> Result<Option<(DiskOffset, Order)>, StorageError> {
        match self.offset_of(id) {
            Some(offset) => Ok(Some((offset, self.load(offset)?))),
            None => Ok(None),
        }
    }

    /// All orders ever placed on `symbol`, with their offsets, in id order.
    pub fn load_for_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<(DiskOffset, Order)>, StorageError> {
        let offsets = {
            let index = self.index.lock().expect("lock");
            let mut ids = index
                .by_symbol
                .get(symbol)
                .cloned()
                .unwrap_or_default();
            ids.sort_unstable();
            ids.iter()
                .filter_map(|id| index.by_id.get(id).copied())
                .collect::<Vec<_>>()
        };
        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            out.push((offset, self.load(offset)?));
        }
        Ok(out)
    }

    /// All orders ever placed by `user_id`, in id order.
    pub fn load_for_user(&self, user_id: &str) -> Result<Vec<Order>, StorageError> {
        let offsets = {
            let index = self.index.lock().expect("lock");
            let mut ids = index.by_user.get(user_id).cloned().unwrap_or_default();
            ids.sort_unstable();
            ids.iter()
                .filter_map(|id| index.by_id.get(id).copied())
                .collect::<Vec<_>>()
        };
        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            out.push(self.load(offset)?);
        }
        Ok(out)
    }

    /// Every order on disk, in id order.
    pub fn load_all(&self) -> Result<Vec<Order>, StorageError> {
        let offsets = {
            let index = self.index.lock().expect("lock");
            let mut pairs: Vec<(u64, DiskOffset)> =
                index.by_id.iter().map(|(id, off)| (*id, *off)).collect();
            pairs.sort_unstable_by_key(|(id, _)| *id);
            pairs
        };
        let mut out = Vec::with_capacity(offsets.len());
        for (_, offset) in offsets {
            out.push(self.load(offset)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.index.lock().expect("lock").by_id.len()
    }

    /// Highest order id on disk (0 when empty). Recovery seeds the id
    /// counter from this when the last metadata save was missed.
    pub fn max_id(&self) -> u64 {
        self.index
            .lock()
            .expect("lock")
            .by_id
            .keys()
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Flush the sidecar. Called on shutdown; losing it only costs a
    /// rebuild scan on the next open.
    pub fn save_index(&self) -> Result<(), StorageError> {
        let pairs: Vec<(u64, DiskOffset)> = {
            let index = self.index.lock().expect("lock");
            index.by_id.iter().map(|(id, off)| (*id, *off)).collect()
        };
        self.write_sidecar(&pairs)
    }

    fn write_sidecar(&self, pairs: &[(u64, DiskOffset)]) -> Result<(), StorageError> {
        let mut out = Vec::new();
        out.extend_from_slice(IDX_MAGIC);
        sidecar::push_u64(&mut out, pairs.len() as u64);
        for (id, offset) in pairs {
            // Secondary keys ride along so a sidecar load never touches
            // the data file.
            let order = self.load(*offset)?;
            sidecar::push_i32(&mut out, *id as i32);
            sidecar::push_u64(&mut out, offset.stored());
            sidecar::push_string(&mut out, &order.symbol);
            sidecar::push_string(&mut out, &order.user_id);
        }
        std::fs::write(&self.idx_path, out)?;
        Ok(())
    }

    /// Parse the sidecar; `None` on any anomaly (missing file, bad magic,
    /// implausible count, oversized name, truncation).
    fn load_sidecar(&self) -> Option<OrderIndex> {
        let raw = std::fs::read(&self.idx_path).ok()?;
        let mut cur = Cursor::new(&raw);
        if cur.bytes(4)? != IDX_MAGIC {
            warn!("order index sidecar has bad magic, rebuilding");
            return None;
        }
        let count = cur.u64()?;
        if count > MAX_INDEX_ENTRIES {
            warn!("order index sidecar count {count} is implausible, rebuilding");
            return None;
        }
        let mut index = OrderIndex::default();
        for _ in 0..count {
            let id = u64::try_from(cur.i32()?).ok()?;
            let offset = DiskOffset::from_stored(cur.u64()?)?;
            let symbol = cur.string()?;
            let user = cur.string()?;
            index.by_id.insert(id, offset);
            index.by_symbol.entry(symbol).or_default().push(id);
            index.by_user.entry(user).or_default().push(id);
        }
        Some(index)
    }

    /// Scan the data file record by record, skipping blank slots and
    /// stopping at the first undecodable record.
    fn rebuild_index(&self) -> Result<OrderIndex, StorageError> {
        let mut index = OrderIndex::default();
        let record = ORDER_RECORD_SIZE as u64;
        let len = self.file.len();
        let mut raw = 0u64;
        let mut buf = [0u8; ORDER_RECORD_SIZE];
        while raw + record <= len {
            let offset = DiskOffset::from_raw(raw);
            self.file.read_at(offset, &mut buf)?;
            match decode_order(&buf) {
                Ok(order) if order.id.0 != 0 && !order.symbol.is_empty() => {
                    index.insert(&order, offset);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("order data file: stopping rebuild at offset {raw}: {err}");
                    break;
                }
            }
            raw += record;
        }
        info!("rebuilt order index: {} orders", index.by_id.len());
        let pairs: Vec<(u64, DiskOffset)> =
            index.by_id.iter().map(|(id, off)| (*id, *off)).collect();
        self.write_sidecar(&pairs)?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn order(id: u64, user: &str, symbol: &str) -> Order {
        Order::new(OrderId(id), user, symbol, Side::Buy, dec!(10.00), 5, id as i64)
    }

    #[test]
    fn persist_load_update_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = OrderStore::open(dir.path()).expect("open");
        let mut placed = order(1, "alice", "AAPL");
        let offset = store.persist(&placed).expect("persist");

        assert_eq!(store.load(offset).expect("load"), placed);
        placed.fill(5);
        store.update(&placed, offset).expect("update");
        let (off2, back) = store.load_by_id(OrderId(1)).expect("load").expect("found");
        assert_eq!(off2, offset);
        assert_eq!(back, placed);
    }

    #[test]
    fn secondary_indexes_filter_by_symbol_and_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = OrderStore::open(dir.path()).expect("open");
        store.persist(&order(1, "alice", "AAPL")).expect("persist");
        store.persist(&order(2, "bob", "AAPL")).expect("persist");
        store.persist(&order(3, "alice", "GOOG")).expect("persist");

        let aapl = store.load_for_symbol("AAPL").expect("load");
        assert_eq!(
            aapl.iter().map(|(_, o)| o.id.0).collect::<Vec<_>>(),
            vec![1, 2]
        );
        let alice = store.load_for_user("alice").expect("load");
        assert_eq!(alice.iter().map(|o| o.id.0).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(store.count(), 3);
        assert!(store.contains(OrderId(2)));
        assert!(!store.contains(OrderId(9)));
    }

    #[test]
    fn reopen_uses_sidecar_and_survives_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = OrderStore::open(dir.path()).expect("open");
            for id in 1..=4 {
                store.persist(&order(id, "alice", "AAPL")).expect("persist");
            }
            store.save_index().expect("save");
        }
        {
            let store = OrderStore::open(dir.path()).expect("reopen");
            assert_eq!(store.count(), 4);
        }
        // Corrupt the sidecar; the store must silently rebuild from data.
        std::fs::write(dir.path().join("orders.idx"), b"garbage").expect("corrupt");
        let store = OrderStore::open(dir.path()).expect("reopen");
        assert_eq!(store.count(), 4);
        assert!(store.load_by_id(OrderId(3)).expect("load").is_some());
    }

    #[test]
    fn missing_sidecar_rebuilds_from_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = OrderStore::open(dir.path()).expect("open");
            store.persist(&order(1, "alice", "AAPL")).expect("persist");
            store.save_index().expect("save");
        }
        std::fs::remove_file(dir.path().join("orders.idx")).expect("remove");
        let store = OrderStore::open(dir.path()).expect("reopen");
        assert_eq!(store.count(), 1);
        assert_eq!(store.load_for_symbol("AAPL").expect("load").len(), 1);
    }
}
