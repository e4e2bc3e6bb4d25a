//! Error taxonomy for the scraping core.
//!
//! Callers branch on these kinds: `BrowserInit` is fatal and should prompt
//! browser-installation guidance, `Network`/`DataExtraction` are recoverable
//! (the orchestrator falls back to manual mode before they ever reach a
//! caller), `ManualModeActivation` means the fallback itself failed and no
//! recovery path remains.

use thiserror::Error;

/// Errors surfaced by searches and workers.
///
/// Low-level chromiumoxide errors are always wrapped into one of these
/// variants before crossing the crate boundary.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// No usable browser after exhausting every channel. The message lists
    /// each channel tried and why it failed.
    #[error("no usable browser found\n{0}")]
    BrowserInit(String),

    /// Navigation failed to reach the target URL.
    #[error("navigation failed: {message} (URL: {url})")]
    Network { message: String, url: String },

    /// Automated scraping produced zero usable offers.
    #[error("data extraction failed: {0}")]
    DataExtraction(String),

    /// The manual-mode fallback could not establish a visible session.
    #[error("manual mode activation failed: {0}")]
    ManualModeActivation(String),

    /// Search parameters rejected before any browser work started.
    #[error("invalid search query: {0}")]
    InvalidQuery(String),

    /// Cooperative cancellation was observed at a checkpoint.
    #[error("search cancelled")]
    Cancelled,
}

impl ScrapeError {
    /// Whether the orchestrator may recover by switching to manual mode.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ScrapeError::Network { .. } | ScrapeError::DataExtraction(_))
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ScrapeError::DataExtraction("empty".into()).is_recoverable());
        assert!(
            ScrapeError::Network {
                message: "timeout".into(),
                url: "https://example.com".into()
            }
            .is_recoverable()
        );
        assert!(!ScrapeError::BrowserInit("none".into()).is_recoverable());
        assert!(!ScrapeError::ManualModeActivation("no display".into()).is_recoverable());
        assert!(!ScrapeError::Cancelled.is_recoverable());
    }
}
