use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use talaria_core::error::EngineError;
use talaria_core::session_pool::SessionFactory;

/// One pooled headless-Chromium instance.
///
/// Cheap to clone; all clones share the same browser process. The pool
/// keeps one clone and hands out others, so `close` only tears the
/// process down once the pool recycles the handle.
#[derive(Clone)]
pub struct BrowserSession {
    browser: Arc<tokio::sync::Mutex<Browser>>,
    timeout: Duration,
}

impl BrowserSession {
    /// Open a tab on `url` and return the rendered page handle.
    ///
    /// The page-filling collaborator drives the page from here; this
    /// crate does not know anything about forms.
    pub async fn open(&self, url: &str) -> Result<chromiumoxide::Page, EngineError> {
        let browser = self.browser.lock().await;
        tokio::time::timeout(self.timeout, browser.new_page(url))
            .await
            .map_err(|_| EngineError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| EngineError::SessionError(format!("Failed to open {url}: {e}")))
    }

    /// Trivial JS evaluation proving the CDP connection is alive.
    pub async fn is_alive(&self) -> bool {
        let browser = self.browser.lock().await;
        let Ok(Ok(page)) =
            tokio::time::timeout(Duration::from_secs(10), browser.new_page("about:blank")).await
        else {
            return false;
        };
        let alive = matches!(
            page.evaluate("1 + 1").await.map(|v| v.into_value::<i64>()),
            Ok(Ok(2))
        );
        let _ = page.close().await;
        alive
    }

    async fn shutdown(self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "Error closing browser");
        }
        let _ = browser.wait().await;
    }
}

/// Launches stealth-flagged headless Chromium sessions for the pool.
///
/// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
/// default locations checked by `chromiumoxide`).
#[derive(Clone)]
pub struct StealthBrowserFactory {
    timeout: Duration,
}

impl StealthBrowserFactory {
    /// Factory with a **30 s** navigation timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless
    /// mode. We look for the real binary inside the snap first, then fall
    /// back to well-known system paths. If nothing is found we return
    /// `None` and let `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            // Snap (Ubuntu default)
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            // Flatpak
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            // Common apt / manual installs
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        // Also honour an explicit override via env var.
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

impl Default for StealthBrowserFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for StealthBrowserFactory {
    type Session = BrowserSession;

    async fn create(&self, platform: &str) -> Result<BrowserSession, EngineError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            // ATS platforms sniff for the automation flag.
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(|e| EngineError::SessionError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::SessionError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        tracing::info!(%platform, "Launched stealth browser session");

        Ok(BrowserSession {
            browser: Arc::new(tokio::sync::Mutex::new(browser)),
            timeout: self.timeout,
        })
    }

    async fn close(&self, session: BrowserSession) {
        session.shutdown().await;
    }

    async fn probe(&self, session: &BrowserSession) -> bool {
        session.is_alive().await
    }
}
