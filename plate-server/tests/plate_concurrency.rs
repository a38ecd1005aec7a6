//! Concurrent reports against both store backends

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use plate_server::plates::{PlateEngine, PlateService, SystemClock};
use plate_server::{DocumentStore, MemoryStore, RedbStore, RetryPolicy};
use shared::plate::{PlateReport, PlateState};
use tempfile::TempDir;

const SHOP: i64 = 160;
const THREADS: usize = 8;
const PLATES_PER_THREAD: usize = 25;

fn service<S: DocumentStore>(store: S) -> PlateService<S> {
    PlateService::new(Arc::new(store), Arc::new(SystemClock), PlateEngine::default())
}

fn close_distinct_plates<S: DocumentStore>(service: &PlateService<S>) {
    std::thread::scope(|scope| {
        for t in 0..THREADS {
            scope.spawn(move || {
                for i in 0..PLATES_PER_THREAD {
                    let report = PlateReport::new(format!("Q{t}-{i}"), 5, PlateState::Closed);
                    service.apply(SHOP, report).unwrap();
                }
            });
        }
    });
}

#[test]
fn memory_store_counts_every_concurrent_close() {
    let service = service(MemoryStore::new(RetryPolicy::new(10, Duration::from_millis(1))));
    close_distinct_plates(&service);

    assert_eq!(
        service.get_counter(SHOP, 5).unwrap().count,
        (THREADS * PLATES_PER_THREAD) as i64
    );
    assert_eq!(service.list_plates(SHOP).unwrap().len(), THREADS * PLATES_PER_THREAD);
}

#[test]
fn redb_store_counts_every_concurrent_close() {
    let dir = TempDir::new().unwrap();
    let store = RedbStore::open(dir.path().join("plates.redb"), RetryPolicy::default()).unwrap();
    let service = service(store);
    close_distinct_plates(&service);

    assert_eq!(
        service.get_counter(SHOP, 5).unwrap().count,
        (THREADS * PLATES_PER_THREAD) as i64
    );
}

#[test]
fn contended_plate_keeps_counter_consistent() {
    // 同一 qrId 被多个线程反复开合
    let service = service(MemoryStore::new(RetryPolicy::new(50, Duration::from_millis(1))));
    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let service = &service;
            scope.spawn(move || {
                for i in 0..50 {
                    let state = if (t + i) % 2 == 0 {
                        PlateState::Closed
                    } else {
                        PlateState::Open
                    };
                    service
                        .apply(SHOP, PlateReport::new(format!("Q{}", i % 3), 5, state))
                        .unwrap();
                }
            });
        }
    });

    let mut closed: HashMap<i16, i64> = HashMap::new();
    for doc in service.list_plates(SHOP).unwrap() {
        if doc.state() == PlateState::Closed {
            *closed.entry(doc.pop_number()).or_default() += 1;
        }
    }
    assert_eq!(
        service.get_counter(SHOP, 5).unwrap().count,
        closed.get(&5).copied().unwrap_or(0)
    );
}
