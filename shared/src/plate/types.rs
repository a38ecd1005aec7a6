//! Plate reports, documents and counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Plate State
// ============================================================================

/// 皿の状態 - the two positions a plate slot cycles through
///
/// Encoded on the wire and in storage as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PlateState {
    /// Empty slot, nothing being served
    Open = 0,
    /// Slot holds a served item
    Closed = 1,
}

impl From<PlateState> for u8 {
    fn from(state: PlateState) -> Self {
        state as u8
    }
}

/// Error when converting an out-of-range value to [`PlateState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPlateState(pub u8);

impl fmt::Display for InvalidPlateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plate state: {} (expected 0 or 1)", self.0)
    }
}

impl std::error::Error for InvalidPlateState {}

impl TryFrom<u8> for PlateState {
    type Error = InvalidPlateState;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PlateState::Open),
            1 => Ok(PlateState::Closed),
            other => Err(InvalidPlateState(other)),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// One observation of a plate slot, as delivered by a collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateReport {
    /// Stable identity of the physical plate slot
    pub qr_id: String,
    /// Menu item served on this plate
    pub pop_number: i16,
    pub state: PlateState,
}

impl PlateReport {
    pub fn new(qr_id: impl Into<String>, pop_number: i16, state: PlateState) -> Self {
        Self {
            qr_id: qr_id.into(),
            pop_number,
            state,
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Current state of one plate slot (one per `qrId` per shop)
///
/// Exactly one of `served_timestamp` / `empty_timestamp` is non-zero after
/// the first write, unless the write happened at epoch second 0. The active
/// one is chosen by the plate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateDocument {
    /// Last reported plate fields
    pub plate_states: PlateReport,
    /// Reserved, always carried forward unchanged
    pub revision: i8,
    /// Epoch seconds of the last Open -> Closed transition (0 = not served)
    pub served_timestamp: i64,
    /// Epoch seconds of the last Closed -> Open transition (0 = not empty)
    pub empty_timestamp: i64,
    /// Wall-clock time of the last write
    pub update_time: DateTime<Utc>,
    /// Served item has sat out past the discard threshold
    #[serde(with = "flag_as_int")]
    pub discard_flag: bool,
}

impl PlateDocument {
    pub fn state(&self) -> PlateState {
        self.plate_states.state
    }

    pub fn qr_id(&self) -> &str {
        &self.plate_states.qr_id
    }

    pub fn pop_number(&self) -> i16 {
        self.plate_states.pop_number
    }

    /// Whether `served_timestamp` is currently active
    ///
    /// Follows the plate state, so a plate served at epoch second 0 still counts.
    pub fn is_served(&self) -> bool {
        self.state() == PlateState::Closed
    }
}

/// Field name of [`CounterDocument::count`], used for atomic increments
pub const COUNT_FIELD: &str = "count";

/// Number of currently closed plates for one menu item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDocument {
    pub count: i64,
}

/// Counter of a single menu item, as listed for a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuCount {
    pub pop_number: i16,
    pub count: i64,
}

// ============================================================================
// Update notification
// ============================================================================

/// Published once per committed report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateUpdate {
    pub shop_number: i64,
    pub document: PlateDocument,
    /// Change applied to the item's counter (-1, 0 or +1)
    pub counter_delta: i64,
}

/// `bool` stored as `0` / `1`
mod flag_as_int {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(flag: &bool, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u8(u8::from(*flag))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(serde::de::Error::custom(format!(
                "invalid discard flag: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_document() -> PlateDocument {
        PlateDocument {
            plate_states: PlateReport::new("Q1", 5, PlateState::Closed),
            revision: 0,
            served_timestamp: 1000,
            empty_timestamp: 0,
            update_time: Utc.timestamp_opt(1000, 0).unwrap(),
            discard_flag: true,
        }
    }

    #[test]
    fn test_plate_state_wire_format() {
        assert_eq!(serde_json::to_string(&PlateState::Open).unwrap(), "0");
        assert_eq!(serde_json::to_string(&PlateState::Closed).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<PlateState>("1").unwrap(),
            PlateState::Closed
        );
        assert!(serde_json::from_str::<PlateState>("2").is_err());
    }

    #[test]
    fn test_plate_state_try_from() {
        assert_eq!(PlateState::try_from(0), Ok(PlateState::Open));
        assert_eq!(PlateState::try_from(7), Err(InvalidPlateState(7)));
    }

    #[test]
    fn test_document_field_names() {
        let value = serde_json::to_value(sample_document()).unwrap();

        assert_eq!(value["plateStates"]["qrId"], "Q1");
        assert_eq!(value["plateStates"]["popNumber"], 5);
        assert_eq!(value["plateStates"]["state"], 1);
        assert_eq!(value["servedTimestamp"], 1000);
        assert_eq!(value["emptyTimestamp"], 0);
        assert_eq!(value["discardFlag"], 1);
        assert!(value["updateTime"].is_string());
    }

    #[test]
    fn test_document_rejects_bad_discard_flag() {
        let mut value = serde_json::to_value(sample_document()).unwrap();
        value["discardFlag"] = serde_json::json!(5);
        assert!(serde_json::from_value::<PlateDocument>(value).is_err());
    }

    #[test]
    fn test_is_served_follows_state() {
        let mut doc = sample_document();
        doc.served_timestamp = 0;
        assert!(doc.is_served());

        doc.plate_states.state = PlateState::Open;
        assert!(!doc.is_served());
    }

    #[test]
    fn test_update_serializes_camel_case() {
        let update = PlateUpdate {
            shop_number: 160,
            document: sample_document(),
            counter_delta: 1,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["shopNumber"], 160);
        assert_eq!(value["counterDelta"], 1);
    }
}
