//! Scraper policy configuration.
//!
//! Every empirically tuned constant (scroll bounds, stall thresholds,
//! timeouts, cache policy) lives here rather than inline, since these are
//! calibrated against one site's current behavior and need to move when
//! the site does. Defaults can be overridden by a `config.yaml` beside
//! the manifest.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Automated searches run headless; manual mode always opens visible.
    #[serde(default = "default_auto_search_headless")]
    pub auto_search_headless: bool,

    /// Abort image/media/font requests on headless automated runs.
    #[serde(default = "default_block_resources")]
    pub block_resources_when_headless: bool,

    #[serde(default = "default_enable_search_cache")]
    pub enable_search_cache: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Hard page-load timeout; expiry is non-fatal (navigation continues
    /// optimistically).
    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,

    /// Total budget for the results-indicator wait, split across the
    /// candidate detectors.
    #[serde(default = "default_data_wait_timeout_secs")]
    pub data_wait_timeout_secs: u64,

    /// Settle pause between data detection and extraction.
    #[serde(default = "default_stabilize_ms")]
    pub stabilize_ms: u64,

    /// Pause after each international scroll step.
    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,

    #[serde(default = "default_international_max_scrolls")]
    pub international_max_scrolls: usize,

    /// The domestic panel paginates many more items per scroll.
    #[serde(default = "default_domestic_max_scrolls")]
    pub domestic_max_scrolls: usize,

    #[serde(default = "default_domestic_scroll_pause_ms")]
    pub domestic_scroll_pause_ms: u64,

    #[serde(default = "default_domestic_bottom_pause_ms")]
    pub domestic_bottom_pause_ms: u64,

    /// Consecutive at-bottom-with-no-new-items checks before stopping.
    #[serde(default = "default_bottom_stall_threshold")]
    pub bottom_stall_threshold: u32,

    /// Consecutive cannot-scroll checks before stopping.
    #[serde(default = "default_scroll_stall_threshold")]
    pub scroll_stall_threshold: u32,

    /// Consecutive zero-new-item iterations before stopping (covers
    /// lazy-loading stalls).
    #[serde(default = "default_no_new_threshold")]
    pub no_new_threshold: u32,

    /// Wait for the inbound panel after selecting an outbound flight.
    #[serde(default = "default_domestic_return_wait_secs")]
    pub domestic_return_wait_secs: u64,

    #[serde(default = "default_domestic_return_settle_ms")]
    pub domestic_return_settle_ms: u64,

    /// Each side of a domestic round trip is truncated to its cheapest N
    /// before pairing.
    #[serde(default = "default_domestic_combination_top_n")]
    pub domestic_combination_top_n: usize,

    #[serde(default = "default_max_concurrent_searches")]
    pub max_concurrent_searches: usize,

    #[serde(default = "default_max_date_range_searches")]
    pub max_date_range_searches: usize,

    /// Persistent browser profile directory (cookies/login survive across
    /// runs). Defaults to the platform data dir.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_auto_search_headless() -> bool {
    true
}
fn default_block_resources() -> bool {
    true
}
fn default_enable_search_cache() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    180
}
fn default_cache_max_entries() -> usize {
    64
}
fn default_page_load_timeout_ms() -> u64 {
    60_000
}
fn default_data_wait_timeout_secs() -> u64 {
    30
}
fn default_stabilize_ms() -> u64 {
    1_500
}
fn default_scroll_pause_ms() -> u64 {
    1_000
}
fn default_international_max_scrolls() -> usize {
    20
}
fn default_domestic_max_scrolls() -> usize {
    300
}
fn default_domestic_scroll_pause_ms() -> u64 {
    300
}
fn default_domestic_bottom_pause_ms() -> u64 {
    500
}
fn default_bottom_stall_threshold() -> u32 {
    3
}
fn default_scroll_stall_threshold() -> u32 {
    3
}
fn default_no_new_threshold() -> u32 {
    8
}
fn default_domestic_return_wait_secs() -> u64 {
    15
}
fn default_domestic_return_settle_ms() -> u64 {
    500
}
fn default_domestic_combination_top_n() -> usize {
    150
}
fn default_max_concurrent_searches() -> usize {
    2
}
fn default_max_date_range_searches() -> usize {
    30
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            auto_search_headless: default_auto_search_headless(),
            block_resources_when_headless: default_block_resources(),
            enable_search_cache: default_enable_search_cache(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            page_load_timeout_ms: default_page_load_timeout_ms(),
            data_wait_timeout_secs: default_data_wait_timeout_secs(),
            stabilize_ms: default_stabilize_ms(),
            scroll_pause_ms: default_scroll_pause_ms(),
            international_max_scrolls: default_international_max_scrolls(),
            domestic_max_scrolls: default_domestic_max_scrolls(),
            domestic_scroll_pause_ms: default_domestic_scroll_pause_ms(),
            domestic_bottom_pause_ms: default_domestic_bottom_pause_ms(),
            bottom_stall_threshold: default_bottom_stall_threshold(),
            scroll_stall_threshold: default_scroll_stall_threshold(),
            no_new_threshold: default_no_new_threshold(),
            domestic_return_wait_secs: default_domestic_return_wait_secs(),
            domestic_return_settle_ms: default_domestic_return_settle_ms(),
            domestic_combination_top_n: default_domestic_combination_top_n(),
            max_concurrent_searches: default_max_concurrent_searches(),
            max_date_range_searches: default_max_date_range_searches(),
            profile_dir: None,
        }
    }
}

impl ScraperConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.max(1))
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn data_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.data_wait_timeout_secs)
    }

    /// Worker-pool width, clamped so a runaway config cannot fork an
    /// unbounded number of browsers.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_searches.clamp(1, 4)
    }

    /// Profile directory for persistent contexts, created on demand.
    pub fn resolve_profile_dir(&self) -> PathBuf {
        match &self.profile_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("farebot")
                .join("profile"),
        }
    }
}

/// Load config from config.yaml in the package root, falling back to
/// defaults when the file is absent.
pub fn load_yaml_config() -> anyhow::Result<ScraperConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: ScraperConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(ScraperConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_values() {
        let config = ScraperConfig::default();
        assert!(config.auto_search_headless);
        assert_eq!(config.cache_ttl_secs, 180);
        assert_eq!(config.cache_max_entries, 64);
        assert_eq!(config.international_max_scrolls, 20);
        assert_eq!(config.domestic_max_scrolls, 300);
        assert_eq!(config.domestic_combination_top_n, 150);
        assert_eq!(config.no_new_threshold, 8);
        assert_eq!(config.max_date_range_searches, 30);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ScraperConfig =
            serde_yaml::from_str("cache_ttl_secs: 5\nauto_search_headless: false\n").unwrap();
        assert_eq!(config.cache_ttl_secs, 5);
        assert!(!config.auto_search_headless);
        assert_eq!(config.cache_max_entries, 64);
        assert_eq!(config.domestic_max_scrolls, 300);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let mut config = ScraperConfig::default();
        config.max_concurrent_searches = 0;
        assert_eq!(config.concurrency(), 1);
        config.max_concurrent_searches = 16;
        assert_eq!(config.concurrency(), 4);
    }
}
