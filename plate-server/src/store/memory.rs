//! Optimistic in-memory document store
//!
//! Transactions buffer their writes and remember the version of every
//! document they read. Commit takes the store lock, checks that none of those
//! versions moved, then applies all writes at once; a moved version fails the
//! commit with [`StorageError::Conflict`] and the attempt is re-run.
//!
//! Nothing is persisted. Used for tests and `STORE_BACKEND=memory`.

use super::{
    AttemptError, DocumentStore, DocumentTxn, RetryPolicy, StorageError, StorageResult,
    increment_field, retry_on_conflict,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type DocId = (String, String);

struct Versioned {
    /// Store-wide monotonic, 0 is reserved for "absent"
    version: u64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Documents {
    collections: HashMap<String, BTreeMap<String, Versioned>>,
    last_version: u64,
}

impl Documents {
    fn lookup(&self, collection: &str, key: &str) -> Option<&Versioned> {
        self.collections.get(collection)?.get(key)
    }

    fn version(&self, collection: &str, key: &str) -> u64 {
        self.lookup(collection, key).map_or(0, |doc| doc.version)
    }

    fn put(&mut self, collection: String, key: String, bytes: Vec<u8>) {
        self.last_version += 1;
        let version = self.last_version;
        self.collections
            .entry(collection)
            .or_default()
            .insert(key, Versioned { version, bytes });
    }
}

/// In-memory store with optimistic concurrency control
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<Documents>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            docs: Arc::default(),
            retry,
        }
    }
}

impl DocumentStore for MemoryStore {
    fn run_transaction<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn DocumentTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        retry_on_conflict(&self.retry, |_attempt| {
            let mut txn = MemoryTxn::new(&self.docs);
            let value = f(&mut txn).map_err(AttemptError::Aborted)?;
            txn.commit().map_err(AttemptError::Store)?;
            Ok(value)
        })
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let docs = self.docs.lock();
        Ok(docs.lookup(collection, key).map(|doc| doc.bytes.clone()))
    }

    fn list(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let docs = self.docs.lock();
        let documents = docs
            .collections
            .get(collection)
            .map(|table| {
                table
                    .iter()
                    .map(|(key, doc)| (key.clone(), doc.bytes.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(documents)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// First observation of a document within a transaction
struct Read {
    version: u64,
    bytes: Option<Vec<u8>>,
}

enum WriteOp {
    Put(Vec<u8>),
    Increment { field: String, delta: i64 },
}

struct Write {
    collection: String,
    key: String,
    op: WriteOp,
}

impl Write {
    fn targets(&self, collection: &str, key: &str) -> bool {
        self.collection == collection && self.key == key
    }
}

struct MemoryTxn<'a> {
    docs: &'a Mutex<Documents>,
    reads: HashMap<DocId, Read>,
    writes: Vec<Write>,
}

impl<'a> MemoryTxn<'a> {
    fn new(docs: &'a Mutex<Documents>) -> Self {
        Self {
            docs,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    /// Committed value as first seen by this transaction
    fn snapshot(&mut self, collection: &str, key: &str) -> Option<Vec<u8>> {
        let id = (collection.to_string(), key.to_string());
        if let Some(read) = self.reads.get(&id) {
            return read.bytes.clone();
        }

        let read = {
            let docs = self.docs.lock();
            let doc = docs.lookup(collection, key);
            Read {
                version: doc.map_or(0, |d| d.version),
                bytes: doc.map(|d| d.bytes.clone()),
            }
        };
        let bytes = read.bytes.clone();
        self.reads.insert(id, read);
        bytes
    }

    fn commit(self) -> StorageResult<()> {
        let mut docs = self.docs.lock();

        for ((collection, key), read) in &self.reads {
            if docs.version(collection, key) != read.version {
                return Err(StorageError::Conflict {
                    collection: collection.clone(),
                    key: key.clone(),
                });
            }
        }

        // 先计算全部结果，全部成功后再写入
        let mut staged: BTreeMap<DocId, Vec<u8>> = BTreeMap::new();
        for write in self.writes {
            let id = (write.collection, write.key);
            let next = match write.op {
                WriteOp::Put(bytes) => bytes,
                WriteOp::Increment { field, delta } => {
                    let current = match staged.get(&id) {
                        Some(bytes) => Some(bytes.as_slice()),
                        None => docs.lookup(&id.0, &id.1).map(|doc| doc.bytes.as_slice()),
                    };
                    increment_field(current, &field, delta, &id.0, &id.1)?
                }
            };
            staged.insert(id, next);
        }

        for ((collection, key), bytes) in staged {
            docs.put(collection, key, bytes);
        }
        Ok(())
    }
}

impl DocumentTxn for MemoryTxn<'_> {
    fn get(&mut self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let last_put = self
            .writes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, w)| match &w.op {
                WriteOp::Put(bytes) if w.targets(collection, key) => Some((i, bytes.clone())),
                _ => None,
            });
        let (mut current, start) = match last_put {
            Some((i, bytes)) => (Some(bytes), i + 1),
            None => (self.snapshot(collection, key), 0),
        };

        for write in &self.writes[start..] {
            if let WriteOp::Increment { field, delta } = &write.op
                && write.targets(collection, key)
            {
                current = Some(increment_field(
                    current.as_deref(),
                    field,
                    *delta,
                    collection,
                    key,
                )?);
            }
        }
        Ok(current)
    }

    fn create(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        if self.get(collection, key)?.is_some() {
            return Err(StorageError::AlreadyExists {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        self.writes.push(Write {
            collection: collection.to_string(),
            key: key.to_string(),
            op: WriteOp::Put(value),
        });
        Ok(())
    }

    fn replace(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.writes.push(Write {
            collection: collection.to_string(),
            key: key.to_string(),
            op: WriteOp::Put(value),
        });
        Ok(())
    }

    fn increment(
        &mut self,
        collection: &str,
        key: &str,
        field: &str,
        delta: i64,
    ) -> StorageResult<()> {
        self.writes.push(Write {
            collection: collection.to_string(),
            key: key.to_string(),
            op: WriteOp::Increment {
                field: field.to_string(),
                delta,
            },
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn store(max_attempts: u32) -> MemoryStore {
        MemoryStore::new(RetryPolicy::new(max_attempts, Duration::ZERO))
    }

    fn count(store: &MemoryStore, collection: &str, key: &str) -> i64 {
        let bytes = store.get(collection, key).unwrap().unwrap();
        serde_json::from_slice::<Value>(&bytes).unwrap()["count"]
            .as_i64()
            .unwrap()
    }

    #[test]
    fn test_conflicting_commit_is_retried() {
        let store = store(5);
        let attempts = AtomicU32::new(0);

        store
            .run_transaction(|txn| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                txn.get("plates", "a")?;
                if n == 1 {
                    // 另一个事务抢先提交
                    store.run_transaction(|other| other.replace("plates", "a", b"1".to_vec()))?;
                }
                txn.replace("plates", "a", b"2".to_vec())
            })
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("plates", "a").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_persistent_conflict_exhausts_retries() {
        let store = store(3);
        let attempts = AtomicU32::new(0);

        let err = store
            .run_transaction(|txn| {
                attempts.fetch_add(1, Ordering::SeqCst);
                txn.get("plates", "a")?;
                store.run_transaction(|other| other.replace("plates", "a", b"x".to_vec()))?;
                txn.replace("plates", "a", b"y".to_vec())
            })
            .unwrap_err();

        assert!(matches!(err, StorageError::RetriesExhausted { attempts: 3 }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("plates", "a").unwrap().unwrap(), b"x");
    }

    #[test]
    fn test_concurrent_create_retries_into_existing() {
        let store = store(5);
        let mut outcomes = Vec::new();

        store
            .run_transaction(|txn| {
                let existing = txn.get("plates", "a")?;
                outcomes.push(existing.is_some());
                if existing.is_none() && outcomes.len() == 1 {
                    store.run_transaction(|other| other.create("plates", "a", b"1".to_vec()))?;
                }
                match existing {
                    Some(_) => txn.replace("plates", "a", b"2".to_vec()),
                    None => txn.create("plates", "a", b"2".to_vec()),
                }
            })
            .unwrap();

        assert_eq!(outcomes, vec![false, true]);
        assert_eq!(store.get("plates", "a").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_increments_do_not_conflict() {
        let store = store(1);
        store
            .run_transaction(|txn| {
                txn.increment("counters", "x", "count", 1)?;
                store.run_transaction(|other| other.increment("counters", "x", "count", 1))?;
                Ok::<_, StorageError>(())
            })
            .unwrap();
        assert_eq!(count(&store, "counters", "x"), 2);
    }

    #[test]
    fn test_parallel_increments_are_not_lost() {
        let store = store(5);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        store
                            .run_transaction(|txn| txn.increment("counters", "x", "count", 1))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(count(&store, "counters", "x"), 400);
    }

    #[test]
    fn test_aborted_transaction_leaves_nothing() {
        let store = store(5);
        let result: StorageResult<()> = store.run_transaction(|txn| {
            txn.replace("plates", "a", b"{}".to_vec())?;
            Err(StorageError::Corrupted {
                collection: "plates".into(),
                key: "a".into(),
                reason: "test".into(),
            })
        });
        assert!(result.is_err());
        assert!(store.get("plates", "a").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_counter_fails_whole_commit() {
        let store = store(5);
        store
            .run_transaction(|txn| txn.replace("counters", "x", b"\"oops\"".to_vec()))
            .unwrap();

        let err = store
            .run_transaction(|txn| {
                txn.replace("plates", "a", b"{}".to_vec())?;
                txn.increment("counters", "x", "count", 1)
            })
            .unwrap_err();

        assert!(matches!(err, StorageError::Corrupted { .. }));
        assert!(store.get("plates", "a").unwrap().is_none());
    }

    #[test]
    fn test_get_sees_pending_writes() {
        let store = store(5);
        let seen = store
            .run_transaction(|txn| {
                txn.replace("counters", "x", br#"{"count":5}"#.to_vec())?;
                txn.increment("counters", "x", "count", -2)?;
                txn.get("counters", "x")
            })
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_slice(&seen).unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_list_missing_collection_is_empty() {
        assert!(store(5).list("nothing").unwrap().is_empty());
    }
}
