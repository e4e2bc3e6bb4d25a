//! Search orchestration.
//!
//! `Scraper` drives one browser session through the pipeline: navigate,
//! wait for result indicators, extract (or run the domestic two-step
//! outbound/inbound flow), and fall back to a visible manual-mode session
//! when automation fails. `FlightSearcher` wraps a backend with the
//! result cache and is the crate's search entry point.
//!
//! Failure policy: `BrowserInit` and `Cancelled` propagate untouched;
//! navigation and extraction failures trigger exactly one manual-mode
//! activation per search, and if that also fails the caller receives
//! `ManualModeActivation`. The browser session is closed on every exit
//! path unless manual mode is left active for the caller.

use async_trait::async_trait;
use chromiumoxide::page::Page;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::combine::combine_round_trip;
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::extract::{self, RawOffer};
use crate::offer::{FlightOffer, sort_and_limit};
use crate::progress::{Progress, ProgressSink};
use crate::query::SearchQuery;
use crate::scripts;
use crate::session::{Session, SessionOptions};

const SOURCE_AUTO: &str = "Interpark (Auto)";
const SOURCE_MANUAL: &str = "Interpark (Manual)";
const SOURCE_DOMESTIC: &str = "Interpark (Domestic)";
const SOURCE_DOMESTIC_OUTBOUND: &str = "Interpark (Domestic outbound)";

/// Seam between the orchestrating layers and the browser-driving scraper.
/// Workers and the cache wrapper depend on this trait so they can be
/// exercised with fakes.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run one full search. May leave the backend in manual mode instead
    /// of returning offers.
    async fn search(&self, query: &SearchQuery, progress: &Progress) -> Result<Vec<FlightOffer>>;

    /// Re-scrape whatever is currently rendered (manual mode).
    async fn extract_current(&self) -> Result<Vec<FlightOffer>>;

    fn is_manual_mode(&self) -> bool;

    /// Close the browser session. Idempotent.
    async fn close(&self);
}

#[async_trait]
impl<B: SearchBackend + ?Sized> SearchBackend for Arc<B> {
    async fn search(&self, query: &SearchQuery, progress: &Progress) -> Result<Vec<FlightOffer>> {
        (**self).search(query, progress).await
    }

    async fn extract_current(&self) -> Result<Vec<FlightOffer>> {
        (**self).extract_current().await
    }

    fn is_manual_mode(&self) -> bool {
        (**self).is_manual_mode()
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// chromiumoxide-backed scraper with manual-mode support.
///
/// The session lives behind a mutex slot so a cancelling worker can close
/// it from outside; page handles are cloned out of the slot and the lock
/// is never held across long operations.
pub struct Scraper {
    config: Arc<ScraperConfig>,
    session: AsyncMutex<Option<Session>>,
    manual_mode: AtomicBool,
    last_domestic: AtomicBool,
    cancel: CancellationToken,
}

impl Scraper {
    pub fn new(config: Arc<ScraperConfig>) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    pub fn with_cancellation(config: Arc<ScraperConfig>, cancel: CancellationToken) -> Self {
        Self {
            config,
            session: AsyncMutex::new(None),
            manual_mode: AtomicBool::new(false),
            last_domestic: AtomicBool::new(false),
            cancel,
        }
    }

    /// Close any existing session and open a fresh one.
    async fn open_session(&self, headless: bool, block_resources: bool) -> Result<Page> {
        self.close_session().await;
        let options = SessionOptions {
            headless,
            profile_dir: Some(self.config.resolve_profile_dir()),
            block_resources,
        };
        let session = Session::start(&options).await?;
        let page = session.page().ok_or_else(|| {
            ScrapeError::BrowserInit("session opened without a page".to_string())
        })?;
        *self.session.lock().await = Some(session);
        Ok(page)
    }

    async fn close_session(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.shutdown().await;
        }
    }

    async fn current_page(&self) -> Option<Page> {
        self.session.lock().await.as_ref().and_then(Session::page)
    }

    /// Poll the results-indicator detectors, splitting the wait budget
    /// across them. A miss is not fatal; the caller proceeds and treats
    /// zero extracted offers as the real failure signal.
    async fn wait_for_results(&self, page: &Page, is_domestic: bool) -> bool {
        let detectors = scripts::results_ready_detectors(is_domestic);
        if detectors.is_empty() {
            return false;
        }
        let total_ms = self.config.data_wait_timeout().as_millis() as u64;
        let per_detector =
            Duration::from_millis((total_ms / detectors.len() as u64).max(1_000));
        for detector in &detectors {
            let deadline = Instant::now() + per_detector;
            loop {
                if extract::evaluate_bool(page, detector).await {
                    return true;
                }
                if self.cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            debug!("results detector timed out");
        }
        false
    }

    /// Wait for the inbound panel to replace the outbound list after an
    /// outbound flight was selected.
    async fn wait_for_return_view(&self, page: &Page) -> bool {
        let script = scripts::domestic_return_view_ready();
        let deadline =
            Instant::now() + Duration::from_secs(self.config.domestic_return_wait_secs.max(5));
        loop {
            if extract::evaluate_bool(page, &script).await {
                return true;
            }
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Activate manual mode, reopening a visible browser when the failed
    /// attempt ran headless. Returns false when activation failed.
    async fn enter_manual_mode(
        &self,
        url: &str,
        is_domestic: bool,
        reopen_visible: bool,
        progress: &Progress,
    ) -> bool {
        let visible_session_alive = self
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| !session.is_headless());
        if !reopen_visible && visible_session_alive {
            self.manual_mode.store(true, Ordering::SeqCst);
            progress.emit("manual mode active - load results in the browser, then trigger extraction");
            return true;
        }

        if reopen_visible {
            progress.emit("automatic extraction failed - opening a visible browser for manual mode...");
        } else {
            progress.emit("manual mode reinitialization: no live session, opening a new one");
        }

        let page = match self.open_session(false, false).await {
            Ok(page) => page,
            Err(e) => {
                error!("manual mode activation failed: {e}");
                self.close_session().await;
                self.manual_mode.store(false, Ordering::SeqCst);
                return false;
            }
        };

        if !url.is_empty() {
            match tokio::time::timeout(self.config.page_load_timeout(), page.goto(url)).await {
                Err(_) => progress.emit("manual mode page load timed out - continuing"),
                Ok(Err(e)) => progress.emit(&format!("manual mode navigation failed: {e}")),
                Ok(Ok(_)) => {}
            }
        }
        let _ = self.wait_for_results(&page, is_domestic).await;
        self.manual_mode.store(true, Ordering::SeqCst);
        progress.emit("manual mode active - load results in the browser, then trigger extraction");
        true
    }

    /// The domestic round-trip two-step flow: collect outbound, select
    /// the cheapest outbound to reveal the inbound panel, collect
    /// inbound, combine. Every degradation point falls back to
    /// outbound-only results rather than failing the search.
    async fn domestic_two_step(
        &self,
        page: &Page,
        query: &SearchQuery,
        url: &str,
        auto_headless: bool,
        progress: &Progress,
    ) -> Result<Vec<FlightOffer>> {
        progress.emit("domestic round trip: collecting outbound and inbound legs separately");

        progress.emit("step 1: extracting outbound list...");
        let outbound = extract::collect_domestic(page, &self.config, &self.cancel).await;
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        progress.emit(&format!("found {} outbound flights", outbound.len()));
        if outbound.is_empty() {
            progress.emit("no outbound data - switching to manual mode");
            return if self
                .enter_manual_mode(url, true, auto_headless, progress)
                .await
            {
                Ok(Vec::new())
            } else {
                Err(ScrapeError::ManualModeActivation(
                    "no outbound data and the manual fallback could not start".to_string(),
                ))
            };
        }

        progress.emit("step 2: selecting an outbound flight to reveal the inbound list...");
        let clicked = match outbound.iter().min_by_key(|o| o.price) {
            Some(best) => {
                let price_text = format!("{}원", scripts::format_krw(best.price));
                extract::evaluate_bool(
                    page,
                    &scripts::click_flight_by_details(
                        &best.airline,
                        &best.dep_time,
                        &best.arr_time,
                        &price_text,
                    ),
                )
                .await
                    || extract::evaluate_bool(page, &scripts::click_any_known_flight()).await
            }
            None => false,
        };
        if !clicked {
            progress.emit("could not select an outbound flight - returning outbound legs only");
            return Ok(self.outbound_only(outbound, query, progress));
        }

        progress.emit("step 3: waiting for the inbound panel...");
        if !self.wait_for_return_view(page).await {
            progress.emit("inbound panel never appeared - returning outbound legs only");
            return Ok(self.outbound_only(outbound, query, progress));
        }
        progress.emit("inbound panel confirmed");

        progress.emit("step 4: extracting inbound list...");
        tokio::time::sleep(Duration::from_millis(self.config.domestic_return_settle_ms)).await;
        let inbound = extract::collect_domestic(page, &self.config, &self.cancel).await;
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        progress.emit(&format!("found {} inbound flights", inbound.len()));

        progress.emit("step 5: combining outbound and inbound legs...");
        if inbound.is_empty() {
            return Ok(self.outbound_only(outbound, query, progress));
        }
        let top_n = self.config.domestic_combination_top_n;
        progress.emit(&format!("computing combinations (top {top_n} x {top_n})"));
        let combos = combine_round_trip(&outbound, &inbound, top_n, query.max_results);
        progress.emit(&format!("keeping the {} cheapest combinations", combos.len()));
        Ok(sort_and_limit(combos, query.max_results, progress))
    }

    fn outbound_only(
        &self,
        outbound: Vec<RawOffer>,
        query: &SearchQuery,
        progress: &Progress,
    ) -> Vec<FlightOffer> {
        let offers = outbound
            .into_iter()
            .map(|raw| raw.into_one_way_offer(SOURCE_DOMESTIC_OUTBOUND))
            .collect();
        sort_and_limit(offers, query.max_results, progress)
    }

    /// Pipeline body; the manual-mode fallback for recoverable errors
    /// lives in [`SearchBackend::search`] around this.
    async fn run_search(
        &self,
        query: &SearchQuery,
        url: &str,
        is_domestic: bool,
        auto_headless: bool,
        progress: &Progress,
    ) -> Result<Vec<FlightOffer>> {
        progress.emit("starting browser...");
        let block = auto_headless && self.config.block_resources_when_headless;
        let page = self.open_session(auto_headless, block).await?;
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        if is_domestic {
            progress.emit(&format!(
                "domestic search mode ({} -> {})",
                query.origin, query.destination
            ));
        } else {
            progress.emit("international search mode");
        }
        if block {
            progress.emit("automated search optimization: headless + resource blocking");
        }
        progress.emit(&format!("URL: {url}"));

        match tokio::time::timeout(self.config.page_load_timeout(), page.goto(url)).await {
            Err(_) => progress.emit("page load timed out - continuing"),
            Ok(Err(e)) => {
                return Err(ScrapeError::Network {
                    message: e.to_string(),
                    url: url.to_string(),
                });
            }
            Ok(Ok(_)) => {}
        }

        progress.emit("waiting for results...");
        let found_data = self.wait_for_results(&page, is_domestic).await;
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        if !found_data {
            // Not fatal by itself: extraction still runs and zero offers
            // is the soft failure that triggers the manual fallback.
            progress.emit("results may not have fully loaded");
        }

        if is_domestic && query.is_round_trip() && found_data {
            match self
                .domestic_two_step(&page, query, url, auto_headless, progress)
                .await
            {
                Ok(results) => return Ok(results),
                Err(e @ (ScrapeError::Cancelled | ScrapeError::ManualModeActivation(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("domestic two-step flow failed: {e}");
                    progress.emit(&format!("domestic round-trip handling failed: {e}"));
                    // Fall through to the single-strategy path.
                }
            }
        }

        progress.emit("data ready, extracting");
        tokio::time::sleep(Duration::from_millis(self.config.stabilize_ms)).await;

        let results: Vec<FlightOffer> = if is_domestic {
            progress.emit("domestic one-way extraction");
            extract::extract_domestic_once(&page)
                .await?
                .into_iter()
                .map(|raw| raw.into_one_way_offer(SOURCE_DOMESTIC))
                .collect()
        } else {
            extract::collect_international(&page, &self.config, &self.cancel)
                .await
                .into_iter()
                .map(|raw| raw.into_itinerary_offer(SOURCE_AUTO))
                .collect()
        };
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        if results.is_empty() {
            return Err(ScrapeError::DataExtraction(
                "automatic extraction returned no offers".to_string(),
            ));
        }

        let results = sort_and_limit(results, query.max_results, progress);
        progress.emit(&format!("automatic extraction succeeded: {} offers", results.len()));
        Ok(results)
    }
}

#[async_trait]
impl SearchBackend for Scraper {
    async fn search(&self, query: &SearchQuery, progress: &Progress) -> Result<Vec<FlightOffer>> {
        let started = Instant::now();
        self.manual_mode.store(false, Ordering::SeqCst);
        let is_domestic = query.is_domestic();
        self.last_domestic.store(is_domestic, Ordering::SeqCst);
        let url = query.build_search_url();
        let auto_headless = self.config.auto_search_headless;

        let outcome = match self
            .run_search(query, &url, is_domestic, auto_headless, progress)
            .await
        {
            Ok(results) => Ok(results),
            Err(
                e @ (ScrapeError::BrowserInit(_)
                | ScrapeError::ManualModeActivation(_)
                | ScrapeError::InvalidQuery(_)
                | ScrapeError::Cancelled),
            ) => Err(e),
            Err(_) if self.cancel.is_cancelled() => Err(ScrapeError::Cancelled),
            Err(e) => {
                // Network, extraction or any unexpected scraping failure:
                // one manual-mode attempt, then give up loudly.
                progress.emit(&format!("{e} - switching to manual mode"));
                if self
                    .enter_manual_mode(&url, is_domestic, auto_headless, progress)
                    .await
                {
                    Ok(Vec::new())
                } else {
                    Err(ScrapeError::ManualModeActivation(format!(
                        "automatic search failed ({e}) and the manual fallback could not start"
                    )))
                }
            }
        };

        if !self.is_manual_mode() {
            self.close().await;
        }

        let elapsed = started.elapsed().as_secs_f32();
        let count = outcome.as_ref().map(Vec::len).unwrap_or(0);
        progress.emit(&format!("search finished ({elapsed:.1}s, {count} results)"));
        outcome
    }

    async fn extract_current(&self) -> Result<Vec<FlightOffer>> {
        let page = self.current_page().await.ok_or_else(|| {
            ScrapeError::DataExtraction("no live browser session to extract from".to_string())
        })?;
        let offers: Vec<FlightOffer> = if self.last_domestic.load(Ordering::SeqCst) {
            extract::extract_domestic_once(&page)
                .await?
                .into_iter()
                .map(|raw| raw.into_one_way_offer(SOURCE_MANUAL))
                .collect()
        } else {
            extract::collect_international(&page, &self.config, &self.cancel)
                .await
                .into_iter()
                .map(|raw| raw.into_itinerary_offer(SOURCE_MANUAL))
                .collect()
        };
        Ok(offers)
    }

    fn is_manual_mode(&self) -> bool {
        self.manual_mode.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.close_session().await;
        self.manual_mode.store(false, Ordering::SeqCst);
    }
}

/// Search entry point: result cache in front of a [`SearchBackend`].
pub struct FlightSearcher<B: SearchBackend = Scraper> {
    backend: B,
    cache: Arc<ResultCache>,
    last_results: parking_lot::Mutex<Vec<FlightOffer>>,
}

impl FlightSearcher<Scraper> {
    pub fn new() -> Self {
        Self::with_config(Arc::new(ScraperConfig::default()))
    }

    pub fn with_config(config: Arc<ScraperConfig>) -> Self {
        let cache = ResultCache::global();
        Self::with_backend(Scraper::new(config), cache)
    }

    /// Searcher whose scraper observes the given cancellation token at
    /// its checkpoints (used by the concurrency workers).
    pub fn with_cancellation(config: Arc<ScraperConfig>, cancel: CancellationToken) -> Self {
        let cache = ResultCache::global();
        Self::with_backend(Scraper::with_cancellation(config, cancel), cache)
    }
}

impl Default for FlightSearcher<Scraper> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SearchBackend> FlightSearcher<B> {
    pub fn with_backend(backend: B, cache: Arc<ResultCache>) -> Self {
        Self {
            backend,
            cache,
            last_results: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Run a search, consulting the cache first. `force_refresh` bypasses
    /// the cache read; a successful automated result is still written
    /// back. Manual-mode results are never cached.
    pub async fn search(
        &self,
        query: &SearchQuery,
        progress: Option<ProgressSink>,
        force_refresh: bool,
    ) -> Result<Vec<FlightOffer>> {
        let progress = Progress::new(progress);
        progress.emit(&format!(
            "searching {} -> {} ({} class)",
            query.origin,
            query.destination,
            query.cabin.label()
        ));

        let key = CacheKey::for_query(query);
        if let Some(cached) = self.cache.get(&key, force_refresh) {
            *self.last_results.lock() = cached.clone();
            match cached.first() {
                Some(cheapest) => progress.emit(&format!(
                    "cache hit: {} results, cheapest {}원",
                    cached.len(),
                    scripts::format_krw(cheapest.price)
                )),
                None => progress.emit("cache hit: no results"),
            }
            return Ok(cached);
        }

        let results = self.backend.search(query, &progress).await?;
        *self.last_results.lock() = results.clone();

        if let Some(cheapest) = results.first() {
            if !self.backend.is_manual_mode() {
                self.cache.put(key, &results);
            }
            progress.emit(&format!(
                "search complete: {} offers, cheapest {}원",
                results.len(),
                scripts::format_krw(cheapest.price)
            ));
        } else if self.backend.is_manual_mode() {
            progress.emit("manual mode active - load results in the browser, then trigger extraction");
        } else {
            progress.emit("no results found");
        }
        Ok(results)
    }

    /// Manual-mode extraction: re-scrape whatever the browser currently
    /// shows, sorted by price. Never cached (human-assisted data is
    /// unverified and possibly partial).
    pub async fn extract_manual(&self) -> Result<Vec<FlightOffer>> {
        let results = self.backend.extract_current().await?;
        let results = sort_and_limit(results, 0, &Progress::default());
        *self.last_results.lock() = results.clone();
        Ok(results)
    }

    pub fn is_manual_mode(&self) -> bool {
        self.backend.is_manual_mode()
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }

    pub fn last_results(&self) -> Vec<FlightOffer> {
        self.last_results.lock().clone()
    }

    pub fn cheapest(&self) -> Option<FlightOffer> {
        self.last_results.lock().first().cloned()
    }
}
