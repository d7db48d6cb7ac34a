use std::time::Duration;

use harvest_core::error::AppError;
use harvest_core::models::RenderedPage;
use harvest_core::traits::{PageHandle, PageRenderer, RenderSession};
use reqwest::Client;

const USER_AGENT: &str = concat!("Harvest/", env!("CARGO_PKG_VERSION"));

/// Static renderer using reqwest.
///
/// Returns the HTML exactly as served, without running JavaScript. Suitable
/// for catalogs that render server side; use the Chromium renderer otherwise.
/// Sessions and pages share one connection pool.
#[derive(Clone)]
pub struct HttpRenderer {
    client: Client,
    timeout_secs: u64,
}

impl HttpRenderer {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl PageRenderer for HttpRenderer {
    type Session = HttpSession;

    async fn open(&self) -> Result<HttpSession, AppError> {
        Ok(HttpSession {
            client: self.client.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

pub struct HttpSession {
    client: Client,
    timeout_secs: u64,
}

impl RenderSession for HttpSession {
    type Page = HttpPage;

    async fn new_page(&self) -> Result<HttpPage, AppError> {
        Ok(HttpPage {
            client: self.client.clone(),
            timeout_secs: self.timeout_secs,
        })
    }

    async fn close(self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct HttpPage {
    client: Client,
    timeout_secs: u64,
}

impl PageHandle for HttpPage {
    async fn fetch(&self, url: &str) -> Result<RenderedPage, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::navigation(url, format!("connection failed: {e}"))
            } else {
                AppError::navigation(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::navigation(url, format!("HTTP {}", status.as_u16())));
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::navigation(url, format!("failed to read response body: {e}"))
            }
        })?;

        tracing::debug!(url = %final_url, bytes = html.len(), "Fetched page");
        Ok(RenderedPage::new(final_url, html))
    }

    async fn close(self) {}
}
