mod common;

use std::sync::Arc;
use std::time::Duration;

use car_tracker::lifetime::{Lifetime, LifetimeGuard};
use car_tracker::source::{default_catalog, MockPriceSource, PriceSource};
use car_tracker::state::{StoreEvent, TrackingStore};
use car_tracker::types::Car;

use common::{car, setup_store, FailingSource, USER};

#[test]
fn track_is_idempotent() {
    let store = setup_store(1);
    assert!(store.track(car("1")));

    let imposter = Car::new("1", "Other", "Thing", 1990, 1);
    assert!(!store.track(imposter));

    let tracked = store.tracked();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].car_id, "1");
    assert_eq!(store.details("1"), Some(car("1")));
}

#[test]
fn untrack_removes_entry_and_details() {
    let store = setup_store(1);
    store.track(car("1"));
    store.track(car("2"));

    assert!(store.untrack("1"));
    assert!(!store.is_tracked("1"));
    assert!(store.details("1").is_none());
    assert_eq!(store.tracked().len(), 1);

    // absent id
    assert!(!store.untrack("1"));
}

#[tokio::test]
async fn camry_scenario() {
    let store = setup_store(42);
    store.track(car("1"));

    let tracked = store.tracked();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].car_id, "1");
    assert_eq!(tracked[0].user_id, USER);
    assert_eq!(store.details_snapshot().len(), 1);

    let up = store.source().sample_current_price("1").await.unwrap().unwrap();
    assert!((24_500..=25_500).contains(&up.current_price));

    store.untrack("1");
    assert!(store.tracked().is_empty());
    assert!(store.details_snapshot().is_empty());
}

#[test]
fn tracking_order_is_insertion_order() {
    let store = setup_store(1);
    for id in ["4", "2", "5"] {
        store.track(car(id));
    }
    store.untrack("2");
    store.track(car("2"));

    let ids: Vec<String> = store.tracked().into_iter().map(|t| t.car_id).collect();
    assert_eq!(ids, vec!["4", "5", "2"]);
}

#[tokio::test]
async fn backfill_converges_and_keeps_unknown_ids() {
    let store = setup_store(1);
    let added = store.restore_tracked(&["1", "2", "99", "3"]);
    assert_eq!(added.len(), 4);
    assert!(store.details_snapshot().is_empty());

    let report = store.backfill_details(&Lifetime::detached()).await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.merged, vec!["1", "2", "3"]);
    assert_eq!(report.unresolved, vec!["99"]);
    assert!(!report.cancelled);

    assert_eq!(store.tracked().len(), 4);
    assert_eq!(store.details("2"), Some(car("2")));
    assert!(store.details("99").is_none());
    assert!(!store.is_loading());

    // second pass has only the unknown id left
    let again = store.backfill_details(&Lifetime::detached()).await.unwrap();
    assert_eq!(again.scanned, 1);
    assert!(again.merged.is_empty());
}

#[tokio::test(start_paused = true)]
async fn backfill_merges_once_at_the_end() {
    let src = MockPriceSource::with_seed(default_catalog(), Duration::from_millis(30), 500, 1);
    let store = TrackingStore::new(USER, Arc::new(src), 16);
    store.restore_tracked(&["1", "2"]);
    let mut events = store.subscribe();
    // drain the restore events
    while events.try_recv().is_ok() {}

    let bg = store.clone();
    let run = tokio::spawn(async move { bg.backfill_details(&Lifetime::detached()).await });

    tokio::time::sleep(Duration::from_millis(40)).await;
    // first lookup is done by now, but nothing has landed yet
    assert!(store.is_loading());
    assert!(store.details_snapshot().is_empty());

    // tracked after the scan started: not part of this run
    store.restore_tracked(&["3"]);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.merged, vec!["1", "2"]);
    assert!(!store.is_loading());
    assert!(store.details("3").is_none());

    let mut merged_events = 0;
    while let Ok(ev) = events.try_recv() {
        if matches!(ev, StoreEvent::DetailsMerged(_)) {
            merged_events += 1;
        }
    }
    assert_eq!(merged_events, 1);

    let report = store.backfill_details(&Lifetime::detached()).await.unwrap();
    assert_eq!(report.merged, vec!["3"]);
}

#[tokio::test(start_paused = true)]
async fn backfill_does_not_resurrect_untracked_cars() {
    let src = MockPriceSource::with_seed(default_catalog(), Duration::from_millis(20), 500, 1);
    let store = TrackingStore::new(USER, Arc::new(src), 16);
    store.restore_tracked(&["1", "2"]);

    let bg = store.clone();
    let run = tokio::spawn(async move { bg.backfill_details(&Lifetime::detached()).await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.untrack("1");

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.merged, vec!["2"]);
    assert!(store.details("1").is_none());
}

#[tokio::test]
async fn backfill_source_error_merges_nothing() {
    let store = TrackingStore::new(USER, Arc::new(FailingSource), 16);
    store.restore_tracked(&["1", "2"]);

    let err = store.backfill_details(&Lifetime::detached()).await.unwrap_err();
    assert!(err.to_string().contains("backend down"));
    assert!(store.details_snapshot().is_empty());
    assert_eq!(store.tracked().len(), 2);
    assert!(!store.is_loading());
}

#[tokio::test(start_paused = true)]
async fn backfill_stops_when_lifetime_ends() {
    let src = MockPriceSource::with_seed(default_catalog(), Duration::from_millis(50), 500, 1);
    let store = TrackingStore::new(USER, Arc::new(src), 16);
    store.restore_tracked(&["1", "2", "3"]);

    let (guard, life) = LifetimeGuard::new();
    let bg = store.clone();
    let run = tokio::spawn(async move { bg.backfill_details(&life).await });

    tokio::time::sleep(Duration::from_millis(70)).await;
    guard.end();

    let report = run.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert!(store.details_snapshot().is_empty());
    assert!(!store.is_loading());
}

#[tokio::test(start_paused = true)]
async fn dropped_backfill_clears_busy_flag() {
    let src = MockPriceSource::with_seed(default_catalog(), Duration::from_millis(200), 500, 1);
    let store = TrackingStore::new(USER, Arc::new(src), 16);
    store.restore_tracked(&["1"]);

    let res = tokio::time::timeout(
        Duration::from_millis(20),
        store.backfill_details(&Lifetime::detached()),
    )
    .await;
    assert!(res.is_err());
    assert!(!store.is_loading());
}
