//! The injected ordered-KV substrate: a trait the engine consumes, plus an
//! in-memory reference implementation used by tests and the CLI demo.
//!
//! Grounded on the teacher's `repo.rs` / `repo_factory.rs` split: a small
//! `Send + Sync` trait standing in for "the real backing store", with one
//! concrete implementation behind it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::SubstrateError;

/// At least 64 KiB + overhead for chunk values (§6).
pub const CHUNK_MAX_VALUE_SIZE: usize = 65536;
/// At least 60 KiB for metadata inlined in the file record (§6).
pub const METADATA_MAX_SIZE: usize = 60 * 1024;

/// One component of a tuple key. Ordering is by variant value; within a
/// fixed key schema every position holds a consistent variant, so
/// lexicographic component ordering (§6) falls out of `Ord` on `Key`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Str(String),
    Int(u64),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<u64> for KeyPart {
    fn from(n: u64) -> Self {
        KeyPart::Int(n)
    }
}

pub type Key = Vec<KeyPart>;

pub fn key(parts: impl IntoIterator<Item = KeyPart>) -> Key {
    parts.into_iter().collect()
}

/// An opaque resumption token. Callers must treat this as a black box and
/// pass it back verbatim; its internal shape is free to change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor(pub(crate) Key);

/// Either a prefix scan or an explicit `[start, end)` range scan.
#[derive(Clone, Debug)]
pub enum KeyRange {
    Prefix(Key),
    Range { start: Key, end: Key },
}

impl KeyRange {
    fn prefix(&self) -> &Key {
        match self {
            KeyRange::Prefix(p) => p,
            KeyRange::Range { start, .. } => start,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListPage {
    pub entries: Vec<(Key, Vec<u8>)>,
    pub cursor: Option<Cursor>,
}

/// The ordered-KV substrate contract consumed by the engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, SubstrateError>;
    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<(), SubstrateError>;
    async fn delete(&self, key: &Key) -> Result<(), SubstrateError>;

    /// Returns up to `limit` entries in `range`, starting after `cursor` if
    /// given. `ListPage::cursor` is `Some` iff more entries may remain.
    async fn list(
        &self,
        range: KeyRange,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<ListPage, SubstrateError>;
}

/// A `BTreeMap`-backed substrate. Not meant for production use — it holds
/// every value in memory — but it satisfies the full `KvStore` contract
/// (atomic point ops, ordered range scans, opaque cursors) and is enough to
/// exercise every engine invariant in tests.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, SubstrateError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<(), SubstrateError> {
        if value.len() > CHUNK_MAX_VALUE_SIZE {
            return Err(SubstrateError::new(format!(
                "value of {} bytes exceeds substrate cap of {} bytes",
                value.len(),
                CHUNK_MAX_VALUE_SIZE
            )));
        }
        self.data.write().insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), SubstrateError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list(
        &self,
        range: KeyRange,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<ListPage, SubstrateError> {
        let guard = self.data.read();
        let prefix = range.prefix().clone();
        let in_range = |k: &Key| -> bool {
            match &range {
                KeyRange::Prefix(p) => k.starts_with(p.as_slice()) && k.len() > p.len(),
                KeyRange::Range { start, end } => k >= start && k < end,
            }
        };
        let after = cursor.map(|c| c.0);
        let mut entries = Vec::new();
        let mut more = false;
        for (k, v) in guard.range(prefix.clone()..) {
            if let Some(ref a) = after {
                if k <= a {
                    continue;
                }
            }
            if !in_range(k) {
                match &range {
                    KeyRange::Prefix(p) if !k.starts_with(p.as_slice()) => break,
                    KeyRange::Range { end, .. } if k >= end => break,
                    _ => continue,
                }
            }
            if entries.len() == limit {
                more = true;
                break;
            }
            entries.push((k.clone(), v.clone()));
        }
        let cursor = if more {
            entries.last().map(|(k, _)| Cursor(k.clone()))
        } else {
            None
        };
        Ok(ListPage { entries, cursor })
    }
}
