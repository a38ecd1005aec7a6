//! Plate transaction orchestrator
//!
//! Applies one report per call: validate, then inside a single store
//! transaction read the previous document, compute the transition, write the
//! document and adjust the item counter. Subscribers are notified only after
//! the transaction commits.

use super::clock::Clock;
use super::engine::{PlateEngine, Transition};
use super::error::{PlateError, PlateResult};
use crate::store::{DocumentStore, DocumentTxn};
use crate::utils::validation::validate_plate_report;
use shared::plate::{
    COUNT_FIELD, CounterDocument, MenuCount, PlateDocument, PlateReport, PlateUpdate,
    counter_collection, counter_key, parse_counter_key, plate_collection, plate_key,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Update channel capacity (display feeds that lag further lose old updates)
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

pub struct PlateService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    engine: PlateEngine,
    update_tx: broadcast::Sender<PlateUpdate>,
}

impl<S> std::fmt::Debug for PlateService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlateService")
            .field("engine", &self.engine)
            .field("update_tx", &"<broadcast::Sender>")
            .finish_non_exhaustive()
    }
}

impl<S: DocumentStore> PlateService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, engine: PlateEngine) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            clock,
            engine,
            update_tx,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one plate report for a shop
    ///
    /// The document write and the counter adjustment commit together; on a
    /// write conflict the whole read-compute-write sequence is re-run.
    pub fn apply(&self, shop_number: i64, report: PlateReport) -> PlateResult<PlateDocument> {
        validate_plate_report(shop_number, &report)?;

        let plates = plate_collection(shop_number);
        let counters = counter_collection(shop_number);
        let key = plate_key(&report.qr_id);

        let transition = self.store.run_transaction(|txn| {
            self.apply_in_txn(txn, &plates, &counters, &key, &report)
        })?;

        tracing::info!(
            shop_number,
            qr_id = %report.qr_id,
            pop_number = report.pop_number,
            state = ?report.state,
            counter_delta = transition.counter_delta,
            discard = transition.document.discard_flag,
            "Plate report applied"
        );
        if let Some(pop) = transition.released_pop_number {
            tracing::info!(shop_number, qr_id = %report.qr_id, from = pop, to = report.pop_number, "Closed plate moved to another item");
        }

        let update = PlateUpdate {
            shop_number,
            document: transition.document.clone(),
            counter_delta: transition.counter_delta,
        };
        if self.update_tx.send(update).is_err() {
            tracing::trace!("No plate update subscribers");
        }

        Ok(transition.document)
    }

    /// One transaction attempt; must stay free of side effects
    fn apply_in_txn(
        &self,
        txn: &mut dyn DocumentTxn,
        plates: &str,
        counters: &str,
        key: &str,
        report: &PlateReport,
    ) -> PlateResult<Transition> {
        let previous = txn
            .get(plates, key)?
            .map(|bytes| decode_plate(plates, key, &bytes))
            .transpose()?;

        let transition = self
            .engine
            .compute(previous.as_ref(), report, self.clock.now());

        let bytes = serde_json::to_vec(&transition.document).map_err(|e| PlateError::Corrupted {
            key: format!("{plates}/{key}"),
            reason: format!("encode failed: {e}"),
        })?;
        match previous {
            Some(_) => txn.replace(plates, key, bytes)?,
            None => txn.create(plates, key, bytes)?,
        }

        if transition.counter_delta != 0 {
            txn.increment(
                counters,
                &counter_key(report.pop_number),
                COUNT_FIELD,
                transition.counter_delta,
            )?;
        }
        if let Some(pop) = transition.released_pop_number {
            txn.increment(counters, &counter_key(pop), COUNT_FIELD, -1)?;
        }

        Ok(transition)
    }

    /// Current document of one plate, discard re-evaluated now
    pub fn get_plate(&self, shop_number: i64, qr_id: &str) -> PlateResult<Option<PlateDocument>> {
        let plates = plate_collection(shop_number);
        let key = plate_key(qr_id);
        let now = self.clock.now();

        self.store
            .get(&plates, &key)?
            .map(|bytes| {
                decode_plate(&plates, &key, &bytes)
                    .map(|doc| self.engine.evaluate_discard(&doc, now))
            })
            .transpose()
    }

    /// All plates of a shop ordered by qrId
    pub fn list_plates(&self, shop_number: i64) -> PlateResult<Vec<PlateDocument>> {
        let plates = plate_collection(shop_number);
        let now = self.clock.now();

        let mut documents = self
            .store
            .list(&plates)?
            .into_iter()
            .map(|(key, bytes)| {
                decode_plate(&plates, &key, &bytes)
                    .map(|doc| self.engine.evaluate_discard(&doc, now))
            })
            .collect::<PlateResult<Vec<_>>>()?;
        documents.sort_by(|a, b| a.qr_id().cmp(b.qr_id()));
        Ok(documents)
    }

    /// Counter of one menu item (zero if it was never incremented)
    pub fn get_counter(&self, shop_number: i64, pop_number: i16) -> PlateResult<CounterDocument> {
        let counters = counter_collection(shop_number);
        let key = counter_key(pop_number);

        match self.store.get(&counters, &key)? {
            Some(bytes) => decode_counter(&counters, &key, &bytes),
            None => Ok(CounterDocument::default()),
        }
    }

    /// All counters of a shop ordered by popNumber
    pub fn list_counters(&self, shop_number: i64) -> PlateResult<Vec<MenuCount>> {
        let counters = counter_collection(shop_number);

        let mut counts = Vec::new();
        for (key, bytes) in self.store.list(&counters)? {
            let Some(pop_number) = parse_counter_key(&key) else {
                tracing::warn!(collection = %counters, key = %key, "Skipping unrecognised counter key");
                continue;
            };
            let counter = decode_counter(&counters, &key, &bytes)?;
            counts.push(MenuCount {
                pop_number,
                count: counter.count,
            });
        }
        counts.sort_by_key(|c| c.pop_number);
        Ok(counts)
    }

    /// Receive a [`PlateUpdate`] for every committed report
    pub fn subscribe(&self) -> broadcast::Receiver<PlateUpdate> {
        self.update_tx.subscribe()
    }
}

fn decode_plate(collection: &str, key: &str, bytes: &[u8]) -> PlateResult<PlateDocument> {
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::error!(collection, key, error = %e, "Plate document failed to decode");
        PlateError::Corrupted {
            key: format!("{collection}/{key}"),
            reason: e.to_string(),
        }
    })
}

fn decode_counter(collection: &str, key: &str, bytes: &[u8]) -> PlateResult<CounterDocument> {
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::error!(collection, key, error = %e, "Counter document failed to decode");
        PlateError::Corrupted {
            key: format!("{collection}/{key}"),
            reason: e.to_string(),
        }
    })
}
