//! Bounded-parallelism fan-out for multi-destination and date-range
//! searches.
//!
//! Each item runs in its own task with its own browser-backed searcher;
//! a semaphore caps how many run at once. Live backends are tracked in a
//! registry so cancellation can close every open session immediately
//! instead of waiting for natural completion; the cancellation token is
//! also observed inside the scraper (after session creation and between
//! scroll iterations). Per-item completion events fire in finish order,
//! but the final aggregate is always re-ordered to the input order.

use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::ResultCache;
use crate::config::ScraperConfig;
use crate::error::Result;
use crate::offer::FlightOffer;
use crate::progress::{Progress, ProgressSink};
use crate::query::SearchQuery;
use crate::scripts::format_krw;
use crate::search::{FlightSearcher, Scraper, SearchBackend};

/// Builds one backend per item, wired to the worker's cancellation token.
pub type BackendFactory<B> = Arc<dyn Fn(CancellationToken) -> B + Send + Sync>;

/// Fired as each destination finishes (finish order, not input order).
pub type DestinationEvent = Arc<dyn Fn(&str, &[FlightOffer]) + Send + Sync>;

/// Fired as each date finishes with its best price and airline.
pub type DateEvent = Arc<dyn Fn(&str, u64, &str) + Send + Sync>;

/// Best-price summary for one searched date: `(price, airline)`, with a
/// zero price meaning no usable result.
pub type DatePrice = (u64, String);

enum ItemStatus {
    Done,
    Empty,
    Manual,
    Cancelled,
    Failed(String),
}

fn default_factory(config: Arc<ScraperConfig>) -> BackendFactory<Scraper> {
    Arc::new(move |cancel| Scraper::with_cancellation(config.clone(), cancel))
}

/// Searches one origin against many destinations in parallel.
pub struct MultiDestinationWorker<B: SearchBackend + 'static = Scraper> {
    config: Arc<ScraperConfig>,
    cache: Arc<ResultCache>,
    factory: BackendFactory<B>,
    cancel: CancellationToken,
    active: Arc<DashMap<usize, Arc<B>>>,
}

impl MultiDestinationWorker<Scraper> {
    pub fn new(config: Arc<ScraperConfig>) -> Self {
        let factory = default_factory(config.clone());
        Self::with_factory(config, ResultCache::global(), factory)
    }
}

impl<B: SearchBackend + 'static> MultiDestinationWorker<B> {
    pub fn with_factory(
        config: Arc<ScraperConfig>,
        cache: Arc<ResultCache>,
        factory: BackendFactory<B>,
    ) -> Self {
        Self {
            config,
            cache,
            factory,
            cancel: CancellationToken::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Request cancellation and close every currently open session.
    /// Completed items keep their results; everything else reports empty.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        close_all(&self.active).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sessions currently tracked as live.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Search every destination, bounded by the configured concurrency.
    /// The returned pairs are in input order regardless of finish order.
    pub async fn run(
        &self,
        template: &SearchQuery,
        destinations: &[String],
        progress: Option<ProgressSink>,
        on_destination: Option<DestinationEvent>,
    ) -> Result<Vec<(String, Vec<FlightOffer>)>> {
        let progress = Progress::new(progress);
        let total = destinations.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        progress.emit(&format!(
            "parallel search: {total} destinations ({} at a time)",
            self.config.concurrency()
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut tasks: JoinSet<(usize, ItemStatus, Vec<FlightOffer>)> = JoinSet::new();

        for (index, dest) in destinations.iter().enumerate() {
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let factory = self.factory.clone();
            let active = self.active.clone();
            let cache = self.cache.clone();
            let template = template.clone();
            let dest = dest.clone();
            let item_progress = progress.with_prefix(&dest);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, ItemStatus::Cancelled, Vec::new());
                };
                if cancel.is_cancelled() {
                    return (index, ItemStatus::Cancelled, Vec::new());
                }
                let query = match template.with_destination(&dest) {
                    Ok(query) => query,
                    Err(e) => return (index, ItemStatus::Failed(e.to_string()), Vec::new()),
                };

                let backend = Arc::new(factory(cancel.clone()));
                active.insert(index, backend.clone());
                // A task must not proceed to search once cancellation has
                // been requested, even with a session already open.
                if cancel.is_cancelled() {
                    active.remove(&index);
                    backend.close().await;
                    return (index, ItemStatus::Cancelled, Vec::new());
                }

                let searcher = FlightSearcher::with_backend(backend.clone(), cache);
                let outcome = searcher.search(&query, item_progress.sink(), false).await;
                let (status, offers) = match outcome {
                    Ok(offers) if searcher.is_manual_mode() && offers.is_empty() => {
                        (ItemStatus::Manual, Vec::new())
                    }
                    Ok(offers) if offers.is_empty() => (ItemStatus::Empty, offers),
                    Ok(offers) => (ItemStatus::Done, offers),
                    Err(crate::error::ScrapeError::Cancelled) => {
                        (ItemStatus::Cancelled, Vec::new())
                    }
                    Err(e) => (ItemStatus::Failed(e.to_string()), Vec::new()),
                };

                active.remove(&index);
                backend.close().await;
                (index, status, offers)
            });
        }

        let mut slots: Vec<Vec<FlightOffer>> = vec![Vec::new(); total];
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (index, status, offers) = match joined {
                Ok(item) => item,
                Err(e) => {
                    warn!("destination task failed to join: {e}");
                    continue;
                }
            };
            if self.cancel.is_cancelled() {
                continue;
            }
            let dest = &destinations[index];
            completed += 1;
            match status {
                ItemStatus::Done => {
                    let cheapest = offers
                        .iter()
                        .filter(|o| o.price > 0)
                        .map(|o| o.price)
                        .min()
                        .unwrap_or(0);
                    progress.emit(&format!(
                        "{dest} complete: {} offers, cheapest {}원 [{completed}/{total}]",
                        offers.len(),
                        format_krw(cheapest)
                    ));
                    if let Some(event) = &on_destination {
                        event(dest, &offers);
                    }
                }
                ItemStatus::Empty => {
                    progress.emit(&format!("{dest}: no results [{completed}/{total}]"));
                    if let Some(event) = &on_destination {
                        event(dest, &offers);
                    }
                }
                ItemStatus::Manual => {
                    progress.emit(&format!(
                        "{dest}: manual mode required, skipping [{completed}/{total}]"
                    ));
                }
                ItemStatus::Cancelled => {}
                ItemStatus::Failed(reason) => {
                    progress.emit(&format!("{dest} search failed: {reason} [{completed}/{total}]"));
                }
            }
            slots[index] = offers;
        }

        if self.cancel.is_cancelled() {
            close_all(&self.active).await;
            progress.emit(&format!(
                "multi-destination search cancelled ({completed}/{total} finished)"
            ));
        } else {
            progress.emit(&format!("multi-destination search finished: {total} destinations"));
        }

        Ok(destinations.iter().cloned().zip(slots).collect())
    }
}

/// Searches one route over many candidate departure dates.
pub struct DateRangeWorker<B: SearchBackend + 'static = Scraper> {
    config: Arc<ScraperConfig>,
    cache: Arc<ResultCache>,
    factory: BackendFactory<B>,
    cancel: CancellationToken,
    active: Arc<DashMap<usize, Arc<B>>>,
}

impl DateRangeWorker<Scraper> {
    pub fn new(config: Arc<ScraperConfig>) -> Self {
        let factory = default_factory(config.clone());
        Self::with_factory(config, ResultCache::global(), factory)
    }
}

impl<B: SearchBackend + 'static> DateRangeWorker<B> {
    pub fn with_factory(
        config: Arc<ScraperConfig>,
        cache: Arc<ResultCache>,
        factory: BackendFactory<B>,
    ) -> Self {
        Self {
            config,
            cache,
            factory,
            cancel: CancellationToken::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    pub async fn cancel(&self) {
        self.cancel.cancel();
        close_all(&self.active).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Search each departure date, reporting the best price per date as
    /// it completes. `return_offset` days, when positive, derive a return
    /// date from each departure date. The date list is capped at the
    /// configured maximum to bound total cost.
    pub async fn run(
        &self,
        template: &SearchQuery,
        dates: &[String],
        return_offset: i64,
        progress: Option<ProgressSink>,
        on_date: Option<DateEvent>,
    ) -> Result<Vec<(String, DatePrice)>> {
        let progress = Progress::new(progress);
        let cap = self.config.max_date_range_searches.max(1);
        let dates: Vec<String> = if dates.len() > cap {
            progress.emit(&format!("searching only the first {cap} dates"));
            dates[..cap].to_vec()
        } else {
            dates.to_vec()
        };
        let total = dates.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        progress.emit(&format!(
            "date-range search: {total} dates ({} at a time)",
            self.config.concurrency()
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut tasks: JoinSet<(usize, ItemStatus, DatePrice)> = JoinSet::new();

        for (index, date) in dates.iter().enumerate() {
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let factory = self.factory.clone();
            let active = self.active.clone();
            let cache = self.cache.clone();
            let template = template.clone();
            let date = date.clone();
            let item_progress = progress.with_prefix(&date);

            tasks.spawn(async move {
                let none: DatePrice = (0, "N/A".to_string());
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, ItemStatus::Cancelled, none);
                };
                if cancel.is_cancelled() {
                    return (index, ItemStatus::Cancelled, none);
                }

                let return_date = derive_return_date(&date, return_offset);
                let query = match template.with_dates(&date, return_date.as_deref()) {
                    Ok(query) => query,
                    Err(e) => return (index, ItemStatus::Failed(e.to_string()), none),
                };

                let backend = Arc::new(factory(cancel.clone()));
                active.insert(index, backend.clone());
                if cancel.is_cancelled() {
                    active.remove(&index);
                    backend.close().await;
                    return (index, ItemStatus::Cancelled, none);
                }

                let searcher = FlightSearcher::with_backend(backend.clone(), cache);
                let outcome = searcher.search(&query, item_progress.sink(), false).await;
                let (status, best) = match outcome {
                    Ok(offers) if searcher.is_manual_mode() && offers.is_empty() => {
                        (ItemStatus::Manual, (0, "manual".to_string()))
                    }
                    Ok(offers) => match offers
                        .iter()
                        .filter(|o| o.price > 0)
                        .min_by_key(|o| o.price)
                    {
                        Some(cheapest) => {
                            (ItemStatus::Done, (cheapest.price, cheapest.airline.clone()))
                        }
                        None => (ItemStatus::Empty, (0, "N/A".to_string())),
                    },
                    Err(crate::error::ScrapeError::Cancelled) => (ItemStatus::Cancelled, none),
                    Err(e) => (ItemStatus::Failed(e.to_string()), (0, "error".to_string())),
                };

                active.remove(&index);
                backend.close().await;
                (index, status, best)
            });
        }

        let mut slots: Vec<DatePrice> = vec![(0, "N/A".to_string()); total];
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (index, status, best) = match joined {
                Ok(item) => item,
                Err(e) => {
                    warn!("date task failed to join: {e}");
                    continue;
                }
            };
            if self.cancel.is_cancelled() {
                continue;
            }
            let date = &dates[index];
            completed += 1;
            match &status {
                ItemStatus::Done => {
                    progress.emit(&format!(
                        "{date}: {}원 ({}) [{completed}/{total}]",
                        format_krw(best.0),
                        best.1
                    ));
                    if let Some(event) = &on_date {
                        event(date, best.0, &best.1);
                    }
                }
                ItemStatus::Empty => {
                    progress.emit(&format!("{date}: no results [{completed}/{total}]"));
                }
                ItemStatus::Manual => {
                    progress.emit(&format!(
                        "{date}: manual mode required, skipping [{completed}/{total}]"
                    ));
                }
                ItemStatus::Cancelled => {}
                ItemStatus::Failed(reason) => {
                    progress.emit(&format!("{date} search failed: {reason} [{completed}/{total}]"));
                }
            }
            slots[index] = best;
        }

        if self.cancel.is_cancelled() {
            close_all(&self.active).await;
            progress.emit(&format!(
                "date-range search cancelled ({completed}/{total} analyzed)"
            ));
        } else {
            progress.emit(&format!("date-range search finished: {total} dates analyzed"));
        }

        Ok(dates.into_iter().zip(slots).collect())
    }
}

async fn close_all<B: SearchBackend>(active: &DashMap<usize, Arc<B>>) {
    let backends: Vec<Arc<B>> = active.iter().map(|entry| entry.value().clone()).collect();
    active.clear();
    for backend in backends {
        backend.close().await;
    }
}

fn derive_return_date(departure: &str, return_offset: i64) -> Option<String> {
    if return_offset <= 0 {
        return None;
    }
    NaiveDate::parse_from_str(departure, "%Y%m%d")
        .ok()
        .map(|date| (date + chrono::Duration::days(return_offset)).format("%Y%m%d").to_string())
}
