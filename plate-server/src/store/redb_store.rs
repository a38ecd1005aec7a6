//! redb-backed document store
//!
//! Each collection maps to its own redb table (`&str` key, JSON bytes value),
//! created lazily on first write. Reading a collection that was never written
//! yields nothing instead of an error.
//!
//! # Concurrency
//!
//! redb serializes write transactions, so a commit never loses a conflict and
//! [`RetryPolicy`] only matters for the optimistic backends. Readers work on
//! MVCC snapshots and never block writers.

use super::{
    AttemptError, DocumentStore, DocumentTxn, RetryPolicy, StorageError, StorageResult,
    increment_field, retry_on_conflict,
};
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, TableError, WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;

fn table(collection: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(collection)
}

/// Durable document store backed by a single redb file
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at the given path
    ///
    /// Commits use redb's default `Durability::Immediate`: a report is on disk
    /// once its transaction returns.
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> StorageResult<Self> {
        let db = Database::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Plate database opened");
        Ok(Self {
            db: Arc::new(db),
            retry,
        })
    }

    /// Create an in-memory database (nothing persisted)
    pub fn open_in_memory(retry: RetryPolicy) -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Ok(Self {
            db: Arc::new(db),
            retry,
        })
    }
}

impl DocumentStore for RedbStore {
    fn run_transaction<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn DocumentTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        retry_on_conflict(&self.retry, |_attempt| {
            let txn = self
                .db
                .begin_write()
                .map_err(|e| AttemptError::Store(e.into()))?;
            let value = {
                let mut handle = RedbTxn { txn: &txn };
                // 出错时 txn 被 drop，自动回滚
                f(&mut handle).map_err(AttemptError::Aborted)?
            };
            txn.commit().map_err(|e| AttemptError::Store(e.into()))?;
            Ok(value)
        })
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn list(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            documents.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(documents)
    }

    fn backend(&self) -> &'static str {
        "redb"
    }
}

/// Operations on an open redb write transaction
struct RedbTxn<'a> {
    txn: &'a WriteTransaction,
}

impl DocumentTxn for RedbTxn<'_> {
    fn get(&mut self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(collection))?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn create(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut table = self.txn.open_table(table(collection))?;
        if table.get(key)?.is_some() {
            return Err(StorageError::AlreadyExists {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        table.insert(key, value.as_slice())?;
        Ok(())
    }

    fn replace(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut table = self.txn.open_table(table(collection))?;
        table.insert(key, value.as_slice())?;
        Ok(())
    }

    fn increment(
        &mut self,
        collection: &str,
        key: &str,
        field: &str,
        delta: i64,
    ) -> StorageResult<()> {
        let mut table = self.txn.open_table(table(collection))?;
        let current = table.get(key)?.map(|guard| guard.value().to_vec());
        let next = increment_field(current.as_deref(), field, delta, collection, key)?;
        table.insert(key, next.as_slice())?;
        Ok(())
    }
}
