//! 统一错误处理
//!
//! HTTP 层统一使用 `shared::error` 中的 [`AppError`]，这里负责把
//! 领域错误转换成对应的错误码：
//!
//! | PlateError | ErrorCode | HTTP |
//! |------------|-----------|------|
//! | Validation | ValidationFailed | 400 |
//! | StoreUnavailable | StoreUnavailable | 503 |
//! | Conflict | TransactionConflict | 503 |
//! | Corrupted | PlateDocumentCorrupted / CounterCorrupted | 500 |

pub use shared::error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};

use crate::plates::PlateError;
use shared::plate::COUNTER_COLLECTION_PREFIX;

impl From<PlateError> for AppError {
    fn from(err: PlateError) -> Self {
        match err {
            PlateError::Validation(msg) => AppError::validation(msg),
            PlateError::StoreUnavailable(source) => {
                tracing::error!(error = %source, "Document store unavailable");
                AppError::new(ErrorCode::StoreUnavailable)
            }
            PlateError::Conflict { attempts } => {
                AppError::new(ErrorCode::TransactionConflict).with_detail("attempts", attempts)
            }
            PlateError::Corrupted { key, reason } => {
                let code = if key.starts_with(COUNTER_COLLECTION_PREFIX) {
                    ErrorCode::CounterCorrupted
                } else {
                    ErrorCode::PlateDocumentCorrupted
                };
                AppError::with_message(code, reason).with_detail("key", key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageError;
    use http::StatusCode;

    #[test]
    fn test_plate_error_status() {
        let cases = [
            (PlateError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                PlateError::StoreUnavailable(StorageError::RetriesExhausted { attempts: 0 }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PlateError::Conflict { attempts: 5 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PlateError::Corrupted {
                    key: "k".into(),
                    reason: "r".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).http_status(), status);
        }
    }

    #[test]
    fn test_corrupted_counter_code() {
        let err = AppError::from(PlateError::Corrupted {
            key: "menu-count-160/pop-number-5".into(),
            reason: "bad".into(),
        });
        assert_eq!(err.code, ErrorCode::CounterCorrupted);
    }

    #[test]
    fn test_conflict_is_retryable() {
        let err = AppError::from(PlateError::Conflict { attempts: 5 });
        assert!(err.code.is_retryable());
        assert_eq!(err.details.unwrap()["attempts"], 5);
    }
}
