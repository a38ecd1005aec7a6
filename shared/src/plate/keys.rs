//! Document namespaces and keys
//!
//! | Document | Collection | Key |
//! |----------|------------|-----|
//! | `PlateDocument` | `plate-states-{shop}` | `qrid-{qrId}` |
//! | `CounterDocument` | `menu-count-{shop}` | `pop-number-{popNumber}` |

pub const PLATE_COLLECTION_PREFIX: &str = "plate-states-";
pub const COUNTER_COLLECTION_PREFIX: &str = "menu-count-";

const PLATE_KEY_PREFIX: &str = "qrid-";
const COUNTER_KEY_PREFIX: &str = "pop-number-";

/// Collection holding one plate document per QR code of a shop
pub fn plate_collection(shop_number: i64) -> String {
    format!("{PLATE_COLLECTION_PREFIX}{shop_number}")
}

/// Collection holding one counter document per menu item of a shop
pub fn counter_collection(shop_number: i64) -> String {
    format!("{COUNTER_COLLECTION_PREFIX}{shop_number}")
}

pub fn plate_key(qr_id: &str) -> String {
    format!("{PLATE_KEY_PREFIX}{qr_id}")
}

pub fn counter_key(pop_number: i16) -> String {
    format!("{COUNTER_KEY_PREFIX}{pop_number}")
}

/// Recover the pop number from a counter document key
pub fn parse_counter_key(key: &str) -> Option<i16> {
    key.strip_prefix(COUNTER_KEY_PREFIX)?.parse().ok()
}
