//! Browser session lifecycle.
//!
//! Obtains a working Chromium-family browser despite environment
//! variability: channels are tried in a fixed order (Chrome, Edge, then a
//! bundled Chromium, downloading one if nothing is installed) and the
//! first that launches wins. Exhausting every channel produces a
//! `BrowserInit` error carrying the per-channel failure list, never a
//! bare engine error.

use anyhow::{Context, Result as AnyResult};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::Page;
use chromiumoxide_cdp::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, ScrapeError};

/// Desktop Chrome user agent presented to the site.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// URL patterns aborted on headless automated runs. Manual sessions never
/// block resources (a human needs to see the page).
const BLOCKED_RESOURCE_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.avif", "*.bmp",
    "*.mp4", "*.webm", "*.m3u8", "*.mp3", "*.ogg",
    "*.woff", "*.woff2", "*.ttf", "*.otf", "*.eot",
];

/// How a session should be opened.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub headless: bool,
    /// Persistent profile directory; cookies and login state survive
    /// across runs when set. `None` opens a fresh throwaway context.
    pub profile_dir: Option<PathBuf>,
    pub block_resources: bool,
}

/// Browser channels tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserChannel {
    Chrome,
    Edge,
    Bundled,
}

impl BrowserChannel {
    const ALL: [BrowserChannel; 3] = [
        BrowserChannel::Chrome,
        BrowserChannel::Edge,
        BrowserChannel::Bundled,
    ];

    fn label(&self) -> &'static str {
        match self {
            BrowserChannel::Chrome => "Chrome",
            BrowserChannel::Edge => "Edge",
            BrowserChannel::Bundled => "Chromium (bundled)",
        }
    }

    /// Locate this channel's executable. The bundled channel downloads a
    /// managed Chromium when none is installed.
    async fn resolve_executable(&self) -> AnyResult<PathBuf> {
        match self {
            BrowserChannel::Chrome => {
                // Environment override beats every search path.
                if let Ok(path) = std::env::var("CHROMIUM_PATH") {
                    let path = PathBuf::from(path);
                    if path.exists() {
                        info!("using browser from CHROMIUM_PATH: {}", path.display());
                        return Ok(path);
                    }
                    warn!("CHROMIUM_PATH points to a non-existent file: {}", path.display());
                }
                find_in_paths(&chrome_paths(), &["google-chrome", "google-chrome-stable", "chrome"])
                    .context("Chrome not installed")
            }
            BrowserChannel::Edge => find_in_paths(&edge_paths(), &["microsoft-edge", "microsoft-edge-stable"])
                .context("Edge not installed"),
            BrowserChannel::Bundled => {
                if let Ok(path) =
                    find_in_paths(&chromium_paths(), &["chromium", "chromium-browser"])
                {
                    return Ok(path);
                }
                download_managed_browser().await
            }
        }
    }
}

fn chrome_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(local).join(r"Google\Chrome\Application\chrome.exe"));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Google Chrome Beta.app/Contents/MacOS/Google Chrome Beta"),
            PathBuf::from("/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/opt/google/chrome/chrome"),
        ]
    }
}

fn edge_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe"),
            PathBuf::from(r"C:\Program Files\Microsoft\Edge\Application\msedge.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(local).join(r"Microsoft\Edge\Application\msedge.exe"));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/microsoft-edge"),
            PathBuf::from("/usr/bin/microsoft-edge-stable"),
        ]
    }
}

fn chromium_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        vec![
            PathBuf::from(r"C:\Program Files\Chromium\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Chromium\Application\chrome.exe"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
            PathBuf::from("/opt/homebrew/bin/chromium"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
            PathBuf::from("/usr/local/bin/chromium"),
        ]
    }
}

fn find_in_paths(paths: &[PathBuf], which_names: &[&str]) -> AnyResult<PathBuf> {
    for path in paths {
        if path.exists() {
            info!("found browser at: {}", path.display());
            return Ok(path.clone());
        }
    }
    if !cfg!(target_os = "windows") {
        for name in which_names {
            if let Ok(output) = Command::new("which").arg(name).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    let path = PathBuf::from(found);
                    info!("found browser via 'which {}': {}", name, path.display());
                    return Ok(path);
                }
            }
        }
    }
    anyhow::bail!("no executable found")
}

/// Download a managed Chromium into the user cache directory and return
/// the executable path.
async fn download_managed_browser() -> AnyResult<PathBuf> {
    info!("downloading managed Chromium...");
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| {
            let fallback = std::env::temp_dir().join(".cache");
            warn!(
                "could not determine cache directory, using temp fallback: {}",
                fallback.display()
            );
            fallback
        })
        .join("farebot/chromium");
    std::fs::create_dir_all(&cache_dir).context("failed to create browser cache directory")?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("failed to build fetcher options")?,
    );
    let revision_info = fetcher.fetch().await.context("failed to fetch browser")?;
    info!("downloaded Chromium to: {}", revision_info.folder_path.display());
    Ok(revision_info.executable_path)
}

/// A launched browser with its event-handler task and initial page.
///
/// `shutdown()` releases page, browser and handler in order and is safe
/// to call more than once; `Drop` aborts the handler as a backstop so it
/// never outlives the session.
pub struct Session {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    headless: bool,
}

impl Session {
    /// Launch a browser, trying each channel in order.
    pub async fn start(options: &SessionOptions) -> Result<Session> {
        if let Some(profile) = &options.profile_dir {
            std::fs::create_dir_all(profile).map_err(|e| {
                ScrapeError::BrowserInit(format!(
                    "cannot create profile directory {}: {e}",
                    profile.display()
                ))
            })?;
        }

        let mut attempts = Vec::new();
        for channel in BrowserChannel::ALL {
            debug!("trying browser channel: {}", channel.label());
            match try_launch(channel, options).await {
                Ok(session) => {
                    info!("browser started via {}", channel.label());
                    return Ok(session);
                }
                Err(e) => {
                    debug!("{} failed to start: {e:#}", channel.label());
                    attempts.push(format!("  - {}: {e:#}", channel.label()));
                }
            }
        }
        Err(ScrapeError::BrowserInit(format!(
            "channels tried:\n{}\ninstall Chrome or Edge, or allow the bundled Chromium download",
            attempts.join("\n")
        )))
    }

    /// Clone of the session's page, if the session is still open.
    pub fn page(&self) -> Option<Page> {
        self.page.clone()
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// Release page, browser and handler in order, swallowing errors from
    /// already-closed resources. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("page close ignored: {e}");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("browser close ignored: {e}");
            }
            if let Err(e) = browser.wait().await {
                debug!("browser wait ignored: {e}");
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Browser::drop kills the process; the handler task must not be
        // left running after that.
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

async fn try_launch(channel: BrowserChannel, options: &SessionOptions) -> AnyResult<Session> {
    let executable = channel.resolve_executable().await?;

    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1400, 900)
        .chrome_executable(executable)
        .arg(format!("--user-agent={USER_AGENT}"))
        .arg("--lang=ko-KR")
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-dev-shm-usage")
        .arg("--no-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-notifications")
        .arg("--mute-audio");

    if let Some(profile) = &options.profile_dir {
        builder = builder.user_data_dir(profile);
    }
    builder = if options.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide does not model;
                // those deserialization failures are noise.
                let benign = message
                    .contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed benign CDP error: {message}");
                } else {
                    error!("browser handler error: {e:?}");
                }
            }
        }
        debug!("browser handler task completed");
    });

    let page = match browser.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            let mut failed = Session {
                browser: Some(browser),
                handler: Some(handler_task),
                page: None,
                headless: options.headless,
            };
            failed.shutdown().await;
            return Err(anyhow::anyhow!("failed to open page: {e}"));
        }
    };

    if options.block_resources {
        if let Err(e) = install_resource_blocking(&page).await {
            // Blocking is an optimization only; the session stays usable.
            warn!("resource blocking not installed: {e}");
        }
    }

    Ok(Session {
        browser: Some(browser),
        handler: Some(handler_task),
        page: Some(page),
        headless: options.headless,
    })
}

async fn install_resource_blocking(page: &Page) -> AnyResult<()> {
    page.execute(EnableParams::default())
        .await
        .context("Network.enable failed")?;
    let patterns: Vec<String> = BLOCKED_RESOURCE_PATTERNS
        .iter()
        .map(|p| (*p).to_string())
        .collect();
    page.execute(SetBlockedUrLsParams::new(patterns))
        .await
        .context("Network.setBlockedURLs failed")?;
    debug!("heavy-resource blocking installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_order_is_fixed() {
        let labels: Vec<_> = BrowserChannel::ALL.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["Chrome", "Edge", "Chromium (bundled)"]);
    }

    #[test]
    fn test_blocked_patterns_cover_images_media_fonts() {
        assert!(BLOCKED_RESOURCE_PATTERNS.contains(&"*.png"));
        assert!(BLOCKED_RESOURCE_PATTERNS.contains(&"*.mp4"));
        assert!(BLOCKED_RESOURCE_PATTERNS.contains(&"*.woff2"));
    }

    #[test]
    fn test_find_in_paths_reports_missing() {
        let missing = vec![PathBuf::from("/definitely/not/here/browser")];
        assert!(find_in_paths(&missing, &[]).is_err());
    }
}
