//! Flight fare scraping core for travel.interpark.com.
//!
//! Drives a Chromium-family browser through the site's search pages,
//! extracts structured offers from the rendered DOM, and degrades to a
//! human-assisted manual mode when automated parsing fails.
//!
//! # Architecture
//! - `session` - browser lifecycle (channel fallback, persistent profile,
//!   resource blocking)
//! - `extract` - DOM extraction strategies and progressive scroll
//!   collection
//! - `combine` - bounded top-K round-trip combination for the domestic
//!   two-step flow
//! - `search` - the orchestrating state machine and the `FlightSearcher`
//!   entry point
//! - `cache` - TTL/LRU result cache keyed by normalized search parameters
//! - `workers` - bounded-parallelism multi-destination and date-range
//!   fan-out with cooperative cancellation
//!
//! # Usage
//! ```no_run
//! use farebot::{CabinClass, FlightSearcher, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let query = SearchQuery::new(
//!         "ICN", "NRT", "20260901", Some("20260905"),
//!         1, CabinClass::Economy, 100,
//!     )?;
//!     let searcher = FlightSearcher::new();
//!     let offers = searcher.search(&query, None, false).await?;
//!     println!("found {} offers", offers.len());
//!     searcher.close().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod combine;
pub mod config;
pub mod error;
pub mod extract;
pub mod offer;
pub mod progress;
pub mod query;
mod scripts;
pub mod search;
pub mod session;
pub mod workers;

pub use cache::{CacheKey, ResultCache};
pub use config::{ScraperConfig, load_yaml_config};
pub use error::{Result, ScrapeError};
pub use offer::{FlightOffer, sort_and_limit};
pub use progress::{Progress, ProgressSink};
pub use query::{CabinClass, SearchQuery};
pub use search::{FlightSearcher, Scraper, SearchBackend};
pub use session::{Session, SessionOptions};
pub use workers::{DateRangeWorker, MultiDestinationWorker};
