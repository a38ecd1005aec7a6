//! Plate tracking types
//!
//! Types shared by the plate server and its display clients:
//! - Reports: what a QR reader observed for one plate slot
//! - Documents: the persisted current state of a plate and the per-item counter
//! - Updates: post-commit notifications fanned out to displays

pub mod keys;
pub mod types;

// Re-exports
pub use keys::{
    COUNTER_COLLECTION_PREFIX, PLATE_COLLECTION_PREFIX, counter_collection, counter_key,
    parse_counter_key, plate_collection, plate_key,
};
pub use types::*;
