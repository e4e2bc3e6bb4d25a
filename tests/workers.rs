//! Concurrency worker behavior against fake backends: cancellation
//! cleanup, input-order aggregation, and the date-range cap.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::{FakeBackend, FakeState, offer};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use farebot::workers::{BackendFactory, DateRangeWorker, MultiDestinationWorker};
use farebot::{CabinClass, ResultCache, ScraperConfig, SearchQuery};

fn template() -> SearchQuery {
    SearchQuery::new("ICN", "NRT", "20260901", None, 1, CabinClass::Economy, 50).unwrap()
}

fn test_cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(true, Duration::from_secs(60), 16))
}

/// Factory that records every created backend's state for later
/// inspection.
fn tracking_factory(
    states: Arc<Mutex<Vec<Arc<FakeState>>>>,
    build: impl Fn(Arc<FakeState>, CancellationToken) -> FakeBackend + Send + Sync + 'static,
) -> BackendFactory<FakeBackend> {
    Arc::new(move |cancel| {
        let state = Arc::new(FakeState::default());
        states.lock().push(state.clone());
        build(state, cancel)
    })
}

#[tokio::test]
async fn cancellation_closes_every_open_session_exactly_once() {
    let states: Arc<Mutex<Vec<Arc<FakeState>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = tracking_factory(states.clone(), |state, cancel| {
        let mut backend = FakeBackend::returning(state, vec![offer("대한항공", 50000)]);
        backend.delay = Duration::from_secs(30);
        backend.cancel = cancel;
        backend
    });
    let worker = Arc::new(MultiDestinationWorker::with_factory(
        Arc::new(ScraperConfig::default()),
        test_cache(),
        factory,
    ));

    let destinations: Vec<String> =
        ["NRT", "KIX", "BKK", "SIN"].iter().map(|s| s.to_string()).collect();
    let run_worker = worker.clone();
    let run_template = template();
    let run_destinations = destinations.clone();
    let handle = tokio::spawn(async move {
        run_worker.run(&run_template, &run_destinations, None, None).await
    });

    // Let the first wave open sessions, then cancel mid-flight.
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.cancel().await;
    let results = handle.await.unwrap().unwrap();

    // Incomplete destinations report empty; everything is in input order.
    assert_eq!(results.len(), destinations.len());
    for ((dest, offers), expected) in results.iter().zip(&destinations) {
        assert_eq!(dest, expected);
        assert!(offers.is_empty());
    }

    // Every session that opened was closed exactly once, and nothing
    // stays tracked as active.
    assert_eq!(worker.active_count(), 0);
    let states = states.lock();
    assert!(states.iter().any(|state| state.sessions_opened() > 0));
    for state in states.iter() {
        if state.sessions_opened() > 0 {
            assert_eq!(state.close_transitions(), 1);
        }
    }
}

#[tokio::test]
async fn aggregate_results_come_back_in_input_order() {
    let prices: Arc<HashMap<String, u64>> = Arc::new(
        [("NRT", 520000u64), ("KIX", 430000), ("BKK", 610000)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    );
    // NRT finishes long after the others.
    let delays: Arc<HashMap<String, u64>> = Arc::new(
        [("NRT", 300u64), ("KIX", 10), ("BKK", 10)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    );
    let states: Arc<Mutex<Vec<Arc<FakeState>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = tracking_factory(states.clone(), move |state, cancel| {
        let mut backend = FakeBackend::returning(state, Vec::new());
        backend.prices = prices.clone();
        backend.delays = delays.clone();
        backend.cancel = cancel;
        backend
    });
    let worker = MultiDestinationWorker::with_factory(
        Arc::new(ScraperConfig::default()),
        test_cache(),
        factory,
    );

    let finish_order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let event_order = finish_order.clone();
    let destinations: Vec<String> = ["NRT", "KIX", "BKK"].iter().map(|s| s.to_string()).collect();
    let results = worker
        .run(
            &template(),
            &destinations,
            None,
            Some(Arc::new(move |dest: &str, _: &[farebot::FlightOffer]| {
                event_order.lock().push(dest.to_string());
            })),
        )
        .await
        .unwrap();

    // Aggregate order matches the input regardless of finish order.
    let order: Vec<&str> = results.iter().map(|(dest, _)| dest.as_str()).collect();
    assert_eq!(order, vec!["NRT", "KIX", "BKK"]);
    assert_eq!(results[0].1[0].price, 520000);
    assert_eq!(results[1].1[0].price, 430000);
    assert_eq!(results[2].1[0].price, 610000);

    // Events fired as items finished; the slow NRT search came last.
    let finish_order = finish_order.lock();
    assert_eq!(finish_order.len(), 3);
    assert_eq!(finish_order.last().map(String::as_str), Some("NRT"));

    // Natural completion also leaves every session closed exactly once.
    for state in states.lock().iter() {
        assert_eq!(state.close_transitions(), 1);
    }
}

#[tokio::test]
async fn invalid_destination_is_reported_not_fatal() {
    let states: Arc<Mutex<Vec<Arc<FakeState>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = tracking_factory(states, |state, cancel| {
        let mut backend = FakeBackend::returning(state, vec![offer("대한항공", 50000)]);
        backend.cancel = cancel;
        backend
    });
    let worker = MultiDestinationWorker::with_factory(
        Arc::new(ScraperConfig::default()),
        test_cache(),
        factory,
    );

    let destinations: Vec<String> = ["NRT", "X1"].iter().map(|s| s.to_string()).collect();
    let results = worker.run(&template(), &destinations, None, None).await.unwrap();
    assert_eq!(results[0].1.len(), 1);
    assert!(results[1].1.is_empty());
}

#[tokio::test]
async fn date_range_caps_the_number_of_dates() {
    let states: Arc<Mutex<Vec<Arc<FakeState>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = tracking_factory(states, |state, cancel| {
        let mut backend = FakeBackend::returning(state, vec![offer("대한항공", 99000)]);
        backend.cancel = cancel;
        backend
    });
    let config = Arc::new(ScraperConfig::default());
    let worker = DateRangeWorker::with_factory(config.clone(), test_cache(), factory);

    let start = NaiveDate::parse_from_str("20260901", "%Y%m%d").unwrap();
    let dates: Vec<String> = (0..40)
        .map(|i| (start + chrono::Duration::days(i)).format("%Y%m%d").to_string())
        .collect();

    let results = worker.run(&template(), &dates, 0, None, None).await.unwrap();
    assert_eq!(results.len(), config.max_date_range_searches);
    assert!(results.iter().all(|(_, (price, _))| *price == 99000));
}

#[tokio::test]
async fn date_range_emits_best_price_per_date_in_input_order() {
    let states: Arc<Mutex<Vec<Arc<FakeState>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = tracking_factory(states, |state, cancel| {
        let mut backend = FakeBackend::returning(
            state,
            vec![offer("진에어", 120000), offer("대한항공", 99000)],
        );
        backend.cancel = cancel;
        backend
    });
    let worker = DateRangeWorker::with_factory(
        Arc::new(ScraperConfig::default()),
        test_cache(),
        factory,
    );

    let dates: Vec<String> =
        ["20260901", "20260902", "20260903"].iter().map(|s| s.to_string()).collect();
    let events: Arc<Mutex<Vec<(String, u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let results = worker
        .run(
            &template(),
            &dates,
            5,
            None,
            Some(Arc::new(move |date: &str, price: u64, airline: &str| {
                sink.lock().push((date.to_string(), price, airline.to_string()));
            })),
        )
        .await
        .unwrap();

    let order: Vec<&str> = results.iter().map(|(date, _)| date.as_str()).collect();
    assert_eq!(order, vec!["20260901", "20260902", "20260903"]);
    // The fake returns an unsorted list; the worker still reports the
    // cheapest offer per date.
    for (_, (price, airline)) in &results {
        assert_eq!(*price, 99000);
        assert_eq!(airline, "대한항공");
    }
    assert_eq!(events.lock().len(), 3);
}
