//! Plate processing errors

use crate::store::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlateError {
    /// Malformed report, rejected before any store access
    #[error("Invalid plate report: {0}")]
    Validation(String),

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// Write conflicts outlasted the retry budget
    #[error("Plate update still conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// Stored document exists but does not decode
    #[error("Corrupted document {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

pub type PlateResult<T> = Result<T, PlateError>;

impl From<StorageError> for PlateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RetriesExhausted { attempts } => PlateError::Conflict { attempts },
            // 未经重试的冲突 / 并发创建
            StorageError::Conflict { .. } | StorageError::AlreadyExists { .. } => {
                PlateError::Conflict { attempts: 1 }
            }
            StorageError::Corrupted {
                collection,
                key,
                reason,
            } => PlateError::Corrupted {
                key: format!("{collection}/{key}"),
                reason,
            },
            other => PlateError::StoreUnavailable(other),
        }
    }
}
