//! Shared types for the plate tracker
//!
//! Common types used by the plate server and its clients: plate reports,
//! persisted documents, update notifications, and the unified error types.

pub mod error;
pub mod plate;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use plate::{
    CounterDocument, MenuCount, PlateDocument, PlateReport, PlateState, PlateUpdate,
};
