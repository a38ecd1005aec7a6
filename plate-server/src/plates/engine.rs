//! Plate state machine
//!
//! Pure computation of the next plate document and the counter adjustment
//! caused by one report. No I/O, so it can run inside a retried transaction.
//!
//! | Previous | Report | served | empty | counter |
//! |----------|--------|--------|-------|---------|
//! | none | Open | 0 | now | 0 |
//! | none | Closed | now | 0 | +1 |
//! | same state | any | kept | kept | 0 |
//! | Closed | Open | 0 | now | -1 |
//! | Open | Closed | now | 0 | +1 |
//!
//! A closed plate whose served timestamp is older than the discard threshold
//! raises `discardFlag`.

use chrono::{DateTime, Utc};
use shared::plate::{PlateDocument, PlateReport, PlateState};

/// 出餐后超过该时长 (秒) 视为应丢弃
pub const DISCARD_THRESHOLD_SECS: i64 = 3600;

/// Result of applying one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Document to persist
    pub document: PlateDocument,
    /// Change for the counter of `document.pop_number()`
    pub counter_delta: i64,
    /// A closed plate moved to another menu item; that item's counter loses it
    pub released_pop_number: Option<i16>,
}

/// Plate transition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateEngine {
    discard_threshold_secs: i64,
}

impl Default for PlateEngine {
    fn default() -> Self {
        Self::new(DISCARD_THRESHOLD_SECS)
    }
}

impl PlateEngine {
    pub fn new(discard_threshold_secs: i64) -> Self {
        Self {
            discard_threshold_secs,
        }
    }

    pub fn discard_threshold_secs(&self) -> i64 {
        self.discard_threshold_secs
    }

    /// Compute the document that results from `report` arriving at `now`
    pub fn compute(
        &self,
        previous: Option<&PlateDocument>,
        report: &PlateReport,
        now: DateTime<Utc>,
    ) -> Transition {
        let ts = now.timestamp();

        let (served_timestamp, empty_timestamp, discard_flag) = match previous {
            Some(prev) if prev.state() == report.state => (
                prev.served_timestamp,
                prev.empty_timestamp,
                prev.discard_flag,
            ),
            _ => match report.state {
                PlateState::Open => (0, ts, false),
                PlateState::Closed => (ts, 0, false),
            },
        };

        let mut document = PlateDocument {
            plate_states: report.clone(),
            revision: previous.map_or(0, |prev| prev.revision),
            served_timestamp,
            empty_timestamp,
            update_time: now,
            discard_flag,
        };
        self.mark_stale(&mut document, ts);

        // 计数 = 当前处于 Closed 的盘子数，按菜品 (popNumber) 归属
        let was_counted = previous
            .filter(|prev| prev.state() == PlateState::Closed)
            .map(|prev| prev.pop_number());
        let is_counted = (report.state == PlateState::Closed).then_some(report.pop_number);

        let counter_delta = i64::from(is_counted == Some(report.pop_number))
            - i64::from(was_counted == Some(report.pop_number));
        let released_pop_number = was_counted.filter(|pop| *pop != report.pop_number);

        Transition {
            document,
            counter_delta,
            released_pop_number,
        }
    }

    /// Re-check staleness of a stored document at `now`
    ///
    /// Only the discard flag can change; nothing else is touched.
    pub fn evaluate_discard(&self, document: &PlateDocument, now: DateTime<Utc>) -> PlateDocument {
        let mut document = document.clone();
        self.mark_stale(&mut document, now.timestamp());
        document
    }

    fn mark_stale(&self, document: &mut PlateDocument, now_secs: i64) {
        if document.is_served()
            && document.served_timestamp.saturating_add(self.discard_threshold_secs) < now_secs
        {
            document.discard_flag = true;
        }
    }
}
