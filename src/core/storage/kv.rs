// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Ordered byte-key store backed by sled.
//!
//! Single-key operations are atomic. `write_batch` applies several puts/deletes
//! as one sled batch for callers that need multi-key atomicity (chain head updates).

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("store closed")]
    Closed,
    /// Error raised by a prefix-iteration visitor, surfaced verbatim.
    #[error("visit: {0}")]
    Visit(String),
}

/// Batch operation.
#[derive(Clone, Debug)]
pub enum KvOp {
    /// Put key/value.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete key.
    Del { key: Vec<u8> },
}

/// Visitor decision during prefix iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    /// Keep going.
    Continue,
    /// Stop iterating; not an error.
    Stop,
}

/// Storage capability used by every persistent component.
pub trait KeyValueStorer: Send + Sync {
    /// Read a value; `None` if absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    /// Write a value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    /// Remove a key (absent keys are fine).
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;
    /// Visit entries sharing `prefix` in key order.
    fn iterate_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<Visit, KvError>,
    ) -> Result<(), KvError>;
    /// Apply several operations atomically.
    fn write_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError>;
    /// Flush and refuse further operations. Idempotent.
    fn close(&self) -> Result<(), KvError>;
}

/// sled-backed store.
pub struct SledStore {
    db: sled::Db,
    closed: AtomicBool,
}

impl SledStore {
    /// Open sled DB at path (directory).
    pub fn open(path: &str) -> Result<Self, KvError> {
        let db = sled::open(path).map_err(|_| KvError::DbOpen)?;
        Ok(Self { db, closed: AtomicBool::new(false) })
    }

    /// Throwaway store removed on drop.
    pub fn temporary() -> Result<Self, KvError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|_| KvError::DbOpen)?;
        Ok(Self { db, closed: AtomicBool::new(false) })
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl KeyValueStorer for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.ensure_open()?;
        let v = self.db.get(key).map_err(|_| KvError::DbIo)?;
        Ok(v.map(|iv| iv.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.ensure_open()?;
        self.db.insert(key, value).map_err(|_| KvError::DbIo)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.ensure_open()?;
        self.db.remove(key).map_err(|_| KvError::DbIo)?;
        Ok(())
    }

    fn iterate_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<Visit, KvError>,
    ) -> Result<(), KvError> {
        self.ensure_open()?;
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(|_| KvError::DbIo)?;
            if visit(&k, &v)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        self.ensure_open()?;
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                KvOp::Put { key, value } => batch.insert(key, value),
                KvOp::Del { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch).map_err(|_| KvError::DbIo)
    }

    fn close(&self) -> Result<(), KvError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Reopen on a failed flush so the next close retries it.
        if self.db.flush().is_err() {
            self.closed.store(false, Ordering::Release);
            return Err(KvError::DbIo);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(store: &SledStore, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        store
            .iterate_prefix(prefix, &mut |k, v| {
                out.push((k.to_vec(), v.to_vec()));
                Ok(Visit::Continue)
            })
            .unwrap();
        out
    }

    #[test]
    fn prefix_scan_is_key_ordered_and_scoped() {
        let store = SledStore::temporary().unwrap();
        store.set(b"account-bob", b"2").unwrap();
        store.set(b"account-alice", b"1").unwrap();
        store.set(b"block-00", b"x").unwrap();

        let got = collect(&store, b"account-");
        assert_eq!(
            got,
            vec![
                (b"account-alice".to_vec(), b"1".to_vec()),
                (b"account-bob".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn visitor_can_stop_early_and_errors_surface() {
        let store = SledStore::temporary().unwrap();
        for i in 0..5u8 {
            store.set(&[b'k', i], &[i]).unwrap();
        }

        let mut seen = 0;
        store
            .iterate_prefix(b"k", &mut |_, _| {
                seen += 1;
                Ok(if seen == 2 { Visit::Stop } else { Visit::Continue })
            })
            .unwrap();
        assert_eq!(seen, 2);

        let err = store
            .iterate_prefix(b"k", &mut |_, _| Err(KvError::Visit("boom".into())))
            .unwrap_err();
        assert!(matches!(err, KvError::Visit(m) if m == "boom"));
    }

    #[test]
    fn delete_then_get_is_none_and_close_is_idempotent() {
        let store = SledStore::temporary().unwrap();
        store.set(b"a", b"1").unwrap();
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);

        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(b"a"), Err(KvError::Closed)));
    }

    #[test]
    fn close_flushes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SledStore::open(path.to_str().unwrap()).unwrap();
            store.set(b"head", b"h1").unwrap();
            store.close().unwrap();
            assert!(matches!(store.set(b"head", b"h2"), Err(KvError::Closed)));
        }
        let store = SledStore::open(path.to_str().unwrap()).unwrap();
        assert_eq!(store.get(b"head").unwrap(), Some(b"h1".to_vec()));
    }

    #[test]
    fn batch_applies_all_ops() {
        let store = SledStore::temporary().unwrap();
        store.set(b"old", b"x").unwrap();
        store
            .write_batch(vec![
                KvOp::Put { key: b"a".to_vec(), value: b"1".to_vec() },
                KvOp::Put { key: b"b".to_vec(), value: b"2".to_vec() },
                KvOp::Del { key: b"old".to_vec() },
            ])
            .unwrap();
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"old").unwrap(), None);
    }
}
