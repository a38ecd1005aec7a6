//! Transactional document store
//!
//! A small capability over a key/value document database:
//!
//! | Operation | Scope | Notes |
//! |-----------|-------|-------|
//! | `get` | txn / snapshot | JSON bytes, `None` if absent |
//! | `create` | txn | fails if the document exists |
//! | `replace` | txn | full-document upsert |
//! | `increment` | txn | field transform, never conflicts |
//! | `list` | snapshot | key order |
//!
//! All writes issued inside [`DocumentStore::run_transaction`] commit together
//! or not at all. When a commit loses a write conflict the whole closure is
//! re-run against fresh reads, so closures must be pure recomputations: no
//! logging of outcomes, no publishing, no external mutation.
//!
//! # Backends
//!
//! - [`RedbStore`] - durable embedded store (one redb table per collection)
//! - [`MemoryStore`] - optimistic in-memory store (versioned reads, validated commits)
//!
//! [`AnyStore`] picks one of them at startup.

mod memory;
mod redb_store;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] ::redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] ::redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] ::redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] ::redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] ::redb::CommitError),

    #[error("Write conflict on {collection}/{key}")]
    Conflict { collection: String, key: String },

    #[error("Transaction still conflicting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Document already exists: {collection}/{key}")]
    AlreadyExists { collection: String, key: String },

    #[error("Corrupted document {collection}/{key}: {reason}")]
    Corrupted {
        collection: String,
        key: String,
        reason: String,
    },
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Operations available inside one transaction attempt
pub trait DocumentTxn {
    /// Read a document (sees this transaction's own writes)
    fn get(&mut self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Create a document; `AlreadyExists` if it is already present
    fn create(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Write the full document, creating it if absent
    fn replace(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Add `delta` to an integer field, creating `{field: delta}` if the document is absent
    ///
    /// Increments do not join the read set: concurrent increments of the same
    /// document never conflict with each other and are never lost.
    fn increment(&mut self, collection: &str, key: &str, field: &str, delta: i64)
    -> StorageResult<()>;
}

/// Atomic multi-document store with transparent conflict retry
pub trait DocumentStore: Send + Sync + 'static {
    /// Run `f` as a single all-or-nothing transaction
    ///
    /// Conflicting commits are retried per the store's [`RetryPolicy`];
    /// errors returned by `f` abort the attempt and are returned unchanged.
    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn DocumentTxn) -> Result<T, E>,
        E: From<StorageError>;

    /// Snapshot read outside of any transaction
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// All documents of a collection in key order (empty if the collection does not exist)
    fn list(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Backend name for health reporting
    fn backend(&self) -> &'static str;
}

/// Backend selected at startup (`STORE_BACKEND`)
#[derive(Debug, Clone)]
pub enum AnyStore {
    Redb(RedbStore),
    Memory(MemoryStore),
}

impl DocumentStore for AnyStore {
    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn DocumentTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        match self {
            AnyStore::Redb(store) => store.run_transaction(f),
            AnyStore::Memory(store) => store.run_transaction(f),
        }
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self {
            AnyStore::Redb(store) => store.get(collection, key),
            AnyStore::Memory(store) => store.get(collection, key),
        }
    }

    fn list(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        match self {
            AnyStore::Redb(store) => store.list(collection),
            AnyStore::Memory(store) => store.list(collection),
        }
    }

    fn backend(&self) -> &'static str {
        match self {
            AnyStore::Redb(store) => store.backend(),
            AnyStore::Memory(store) => store.backend(),
        }
    }
}

/// Conflict retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub base_delay: Duration,
}

const MAX_BACKOFF: Duration = Duration::from_secs(1);

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(10))
    }
}

/// Why a single transaction attempt did not commit
pub(crate) enum AttemptError<E> {
    /// The closure returned an error; not retried
    Aborted(E),
    /// The store failed to begin or commit
    Store(StorageError),
}

/// Drive transaction attempts until one commits, the closure aborts, or retries run out
pub(crate) fn retry_on_conflict<T, E>(
    policy: &RetryPolicy,
    mut attempt: impl FnMut(u32) -> Result<T, AttemptError<E>>,
) -> Result<T, E>
where
    E: From<StorageError>,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(AttemptError::Aborted(e)) => return Err(e),
            Err(AttemptError::Store(e)) if e.is_conflict() => {
                if n >= policy.max_attempts {
                    tracing::warn!(attempts = n, error = %e, "Transaction retries exhausted");
                    return Err(StorageError::RetriesExhausted { attempts: n }.into());
                }
                let delay = policy.backoff(n);
                tracing::debug!(attempt = n, delay_ms = delay.as_millis() as u64, error = %e, "Retrying conflicting transaction");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(AttemptError::Store(e)) => return Err(e.into()),
        }
    }
}

/// Apply an integer field increment to an encoded JSON document
pub(crate) fn increment_field(
    current: Option<&[u8]>,
    field: &str,
    delta: i64,
    collection: &str,
    key: &str,
) -> StorageResult<Vec<u8>> {
    let corrupted = |reason: String| StorageError::Corrupted {
        collection: collection.to_string(),
        key: key.to_string(),
        reason,
    };

    let mut object = match current {
        Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(corrupted(format!("expected object, found {other}"))),
            Err(e) => return Err(corrupted(e.to_string())),
        },
        None => Map::new(),
    };

    let base = match object.get(field) {
        None => 0,
        Some(value) => value
            .as_i64()
            .ok_or_else(|| corrupted(format!("field `{field}` is not an integer: {value}")))?,
    };
    let next = base
        .checked_add(delta)
        .ok_or_else(|| corrupted(format!("field `{field}` overflowed")))?;
    object.insert(field.to_string(), Value::from(next));

    serde_json::to_vec(&Value::Object(object)).map_err(|e| corrupted(e.to_string()))
}
