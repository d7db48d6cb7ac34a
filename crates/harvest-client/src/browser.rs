use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use harvest_core::error::AppError;
use harvest_core::models::RenderedPage;
use harvest_core::traits::{PageHandle, PageRenderer, RenderSession};
use tokio::task::JoinHandle;

/// Chromium renderer driven over the Chrome DevTools Protocol.
///
/// Each [`PageRenderer::open`] launches one browser process, so a pipeline
/// phase runs against a single browser. Page handles are tabs and are
/// reused for every page of one entity. JavaScript runs before the HTML
/// snapshot is taken, which makes this the renderer for client-side
/// rendered catalogs.
///
/// # Example
///
/// ```rust,no_run
/// use harvest_client::ChromiumRenderer;
/// use harvest_core::traits::{PageHandle, PageRenderer, RenderSession};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let renderer = ChromiumRenderer::new();
/// let session = renderer.open().await?;
/// let page = session.new_page().await?;
/// let rendered = page.fetch("https://example.com").await?;
/// println!("{}", rendered.html.len());
/// page.close().await;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    headless: bool,
    timeout: Duration,
    settle: Duration,
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromiumRenderer {
    /// Headless, 30 s navigation timeout, 1.5 s settle wait.
    pub fn new() -> Self {
        Self {
            headless: true,
            timeout: Duration::from_secs(30),
            settle: Duration::from_millis(1500),
        }
    }

    /// Show the browser window.
    pub fn headed(mut self) -> Self {
        self.headless = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra wait after load for late network requests to land.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn browser_config(&self) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .request_timeout(self.timeout);

        // The snap wrapper at /snap/bin/chromium rejects standard Chrome
        // flags, so prefer the real binary when one can be found.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        builder = if self.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };

        builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Browser(format!("Browser config error: {e}")))
    }
}

/// Locate a Chrome/Chromium binary. `CHROME_BIN` wins, then well-known
/// install paths; `None` leaves the lookup to chromiumoxide.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl PageRenderer for ChromiumRenderer {
    type Session = ChromiumSession;

    async fn open(&self) -> Result<ChromiumSession, AppError> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        tracing::info!(headless = self.headless, "Browser launched");
        Ok(ChromiumSession {
            browser,
            handler,
            timeout: self.timeout,
            settle: self.settle,
        })
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    timeout: Duration,
    settle: Duration,
}

impl RenderSession for ChromiumSession {
    type Page = ChromiumPage;

    async fn new_page(&self) -> Result<ChromiumPage, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Browser(format!("Failed to open tab: {e}")))?;
        Ok(ChromiumPage {
            page,
            timeout: self.timeout,
            settle: self.settle,
        })
    }

    async fn close(mut self) -> Result<(), AppError> {
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| AppError::Browser(format!("Failed to close browser: {e}")));
        if closed.is_ok() {
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
        tracing::info!("Browser closed");
        closed.map(|_| ())
    }
}

pub struct ChromiumPage {
    page: Page,
    timeout: Duration,
    settle: Duration,
}

impl PageHandle for ChromiumPage {
    async fn fetch(&self, url: &str) -> Result<RenderedPage, AppError> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| AppError::navigation(url, e))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| AppError::navigation(url, e))?;
            tokio::time::sleep(self.settle).await;

            let html = self
                .page
                .content()
                .await
                .map_err(|e| AppError::navigation(url, format!("failed to read content: {e}")))?;
            let final_url = self
                .page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| url.to_string());
            Ok::<_, AppError>(RenderedPage::new(final_url, html))
        };

        match tokio::time::timeout(self.timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn close(self) {
        if let Err(e) = self.page.close().await {
            tracing::debug!(error = %e, "Failed to close tab");
        }
    }
}
