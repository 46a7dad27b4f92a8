//! Shared parsing/serialization helpers for `*.idx` index sidecars.
//!
//! Sidecars are a cache over the data files: a 4-byte magic, a `u64` entry
//! count, then store-specific entries. Every read is bounds-checked; any
//! anomaly makes the caller discard the sidecar and rebuild by scanning the
//! data file.

/// Entry counts above this are treated as corruption.
pub(crate) const MAX_INDEX_ENTRIES: u64 = 1_000_000;
/// Symbol/user strings above this length are treated as corruption.
pub(crate) const MAX_NAME_LEN: u64 = 100;

/// Forward-only reader over a sidecar byte buffer. Every accessor returns
/// `None` on underrun or on a sanity-bound violation.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Some(out)
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        let raw = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(raw);
        Some(u64::from_le_bytes(arr))
    }

    pub(crate) fn i32(&mut self) -> Option<i32> {
        let raw = self.bytes(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(raw);
        Some(i32::from_le_bytes(arr))
    }

    /// Length-prefixed string: `u64 len` then `len` bytes. Rejects lengths
    /// over [`MAX_NAME_LEN`].
    pub(crate) fn string(&mut self) -> Option<String> {
        let len = self.u64()?;
        if len > MAX_NAME_LEN {
            return None;
        }
        let raw = self.bytes(len as usize)?;
        Some(String::from_utf8_lossy(raw).into_owned())
    }

    /// Whether the whole buffer has been consumed.
    pub(crate) fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}

pub(crate) fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn push_string(out: &mut Vec<u8>, value: &str) {
    push_u64(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}
