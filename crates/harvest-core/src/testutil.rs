//! Test utilities: scripted implementations of the collaborator traits.
//!
//! [`MockRenderer`] serves canned pages by URL and records every navigation;
//! [`MockExtractor`] reads pages whose HTML body is a JSON-encoded
//! [`MockPage`]. Together they let the pipeline run end to end without a
//! browser or network.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{CountHint, Entity, Extraction, FieldValue, Record, RenderedPage};
use crate::traits::{Extractor, PageHandle, PageRenderer, RenderSession};

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

/// Page content understood by [`MockExtractor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockPage {
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Report the entities as coming from the fallback tier.
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub records: Vec<BTreeMap<String, FieldValue>>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing page with the given slugs (name = slug).
    pub fn listing(slugs: &[&str]) -> Self {
        Self {
            entities: slugs.iter().map(|s| Entity::new(*s, *s)).collect(),
            ..Self::default()
        }
    }

    /// Collection page with `count` records numbered from `first`.
    pub fn records(first: u64, count: u64) -> Self {
        Self {
            records: (first..first + count)
                .map(|n| BTreeMap::from([("n".to_string(), FieldValue::from(n))]))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn to_html(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor over JSON-encoded [`MockPage`] bodies. Anything else extracts as empty.
#[derive(Debug, Clone, Default)]
pub struct MockExtractor;

impl MockExtractor {
    fn parse(page: &RenderedPage) -> MockPage {
        serde_json::from_str(&page.html).unwrap_or_default()
    }
}

impl Extractor for MockExtractor {
    fn extract_entities(&self, page: &RenderedPage) -> Extraction<Vec<Entity>> {
        let parsed = Self::parse(page);
        if parsed.fallback {
            Extraction::fallback(parsed.entities)
        } else {
            Extraction::primary(parsed.entities)
        }
    }

    fn extract_records(&self, page: &RenderedPage, entity: &Entity) -> Vec<Record> {
        Self::parse(page)
            .records
            .into_iter()
            .map(|fields| Record {
                entity: entity.slug.clone(),
                fields,
            })
            .collect()
    }

    fn extract_total_count(&self, page: &RenderedPage) -> Option<CountHint> {
        Self::parse(page).total.map(CountHint::structured)
    }

    fn find_next_page(&self, page: &RenderedPage) -> Option<String> {
        Self::parse(page).next
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockSite {
    pages: HashMap<String, String>,
    /// Remaining forced failures per URL.
    failures: HashMap<String, u32>,
    fetched: Vec<String>,
    sessions_opened: u32,
    sessions_closed: u32,
    pages_opened: u32,
    pages_closed: u32,
    open_error: Option<AppError>,
}

/// Renderer serving canned pages. Unknown URLs fail with a navigation error.
#[derive(Clone, Default)]
pub struct MockRenderer {
    site: Arc<Mutex<MockSite>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, page: MockPage) -> Self {
        self.with_html(url, &page.to_html())
    }

    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.site
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), html.to_string());
        self
    }

    /// Make the next `times` fetches of `url` fail.
    pub fn failing(self, url: &str, times: u32) -> Self {
        self.site
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), times);
        self
    }

    /// Make `open()` fail once.
    pub fn with_open_error(self, error: AppError) -> Self {
        self.site.lock().unwrap().open_error = Some(error);
        self
    }

    /// Every URL navigated to, in order (failed attempts included).
    pub fn fetched(&self) -> Vec<String> {
        self.site.lock().unwrap().fetched.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.site.lock().unwrap().fetched.len()
    }

    pub fn sessions_opened(&self) -> u32 {
        self.site.lock().unwrap().sessions_opened
    }

    pub fn sessions_closed(&self) -> u32 {
        self.site.lock().unwrap().sessions_closed
    }

    pub fn pages_opened(&self) -> u32 {
        self.site.lock().unwrap().pages_opened
    }

    pub fn pages_closed(&self) -> u32 {
        self.site.lock().unwrap().pages_closed
    }
}

impl PageRenderer for MockRenderer {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, AppError> {
        let mut site = self.site.lock().unwrap();
        if let Some(e) = site.open_error.take() {
            return Err(e);
        }
        site.sessions_opened += 1;
        Ok(MockSession {
            site: self.site.clone(),
        })
    }
}

pub struct MockSession {
    site: Arc<Mutex<MockSite>>,
}

impl RenderSession for MockSession {
    type Page = MockPageHandle;

    async fn new_page(&self) -> Result<MockPageHandle, AppError> {
        self.site.lock().unwrap().pages_opened += 1;
        Ok(MockPageHandle {
            site: self.site.clone(),
        })
    }

    async fn close(self) -> Result<(), AppError> {
        self.site.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

pub struct MockPageHandle {
    site: Arc<Mutex<MockSite>>,
}

impl PageHandle for MockPageHandle {
    async fn fetch(&self, url: &str) -> Result<RenderedPage, AppError> {
        let mut site = self.site.lock().unwrap();
        site.fetched.push(url.to_string());

        if let Some(remaining) = site.failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::navigation(url, "simulated failure"));
            }
        }

        match site.pages.get(url) {
            Some(html) => Ok(RenderedPage::new(url, html.clone())),
            None => Err(AppError::navigation(url, "HTTP 404")),
        }
    }

    async fn close(self) {
        self.site.lock().unwrap().pages_closed += 1;
    }
}
