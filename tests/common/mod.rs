//! Shared fake search backend for integration tests.
//!
//! Simulates the session lifecycle (open on search, close transitions
//! counted exactly once) without a browser, so cache behavior and worker
//! cancellation cleanup can be asserted deterministically.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use farebot::progress::Progress;
use farebot::{FlightOffer, ScrapeError, SearchBackend, SearchQuery};

#[derive(Default)]
pub struct FakeState {
    pub search_calls: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub close_transitions: AtomicUsize,
    pub open: AtomicBool,
}

impl FakeState {
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn close_transitions(&self) -> usize {
        self.close_transitions.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub state: Arc<FakeState>,
    /// Fixed offers returned by every search; when empty, one offer is
    /// synthesized from `prices` keyed by destination.
    pub offers: Vec<FlightOffer>,
    pub prices: Arc<HashMap<String, u64>>,
    /// Per-destination search duration in milliseconds; `delay` otherwise.
    pub delays: Arc<HashMap<String, u64>>,
    pub manual: bool,
    pub delay: Duration,
    pub cancel: CancellationToken,
}

impl FakeBackend {
    pub fn returning(state: Arc<FakeState>, offers: Vec<FlightOffer>) -> Self {
        Self {
            state,
            offers,
            prices: Arc::new(HashMap::new()),
            delays: Arc::new(HashMap::new()),
            manual: false,
            delay: Duration::ZERO,
            cancel: CancellationToken::new(),
        }
    }
}

pub fn offer(airline: &str, price: u64) -> FlightOffer {
    FlightOffer {
        airline: airline.to_string(),
        price,
        departure_time: "08:00".to_string(),
        arrival_time: "10:10".to_string(),
        ..FlightOffer::default()
    }
}

#[async_trait]
impl SearchBackend for FakeBackend {
    async fn search(&self, query: &SearchQuery, _progress: &Progress) -> farebot::Result<Vec<FlightOffer>> {
        self.state.search_calls.fetch_add(1, Ordering::SeqCst);
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.state.open.store(true, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&query.destination)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
            }
        }

        if self.offers.is_empty() {
            Ok(self
                .prices
                .get(&query.destination)
                .map(|price| vec![offer(&query.destination, *price)])
                .unwrap_or_default())
        } else {
            Ok(self.offers.clone())
        }
    }

    async fn extract_current(&self) -> farebot::Result<Vec<FlightOffer>> {
        Ok(self.offers.clone())
    }

    fn is_manual_mode(&self) -> bool {
        self.manual
    }

    async fn close(&self) {
        if self.state.open.swap(false, Ordering::SeqCst) {
            self.state.close_transitions.fetch_add(1, Ordering::SeqCst);
        }
    }
}
