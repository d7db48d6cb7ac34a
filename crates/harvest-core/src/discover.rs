//! Phase one: paginate a catalog listing into a deduplicated entity list.
//!
//! Progress is checkpointed after every listing page, so an interrupted
//! discovery resumes from its page cursor. Once discovery finishes, the
//! entity list and a completion marker are written, and later runs with
//! resume enabled return that list without opening a renderer session.
//!
//! A non-empty entity checkpoint is trusted as complete and never
//! re-validated against the live listing. A stale or truncated list
//! written by hand is indistinguishable from a real one.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, DISCOVERY_COMPLETE, DISCOVERY_PROGRESS, ENTITIES};
use crate::error::AppError;
use crate::models::Entity;
use crate::throttle::{RetryPolicy, ThrottleConfig, throttled_delay, with_retry};
use crate::traits::{Extractor, PageHandle, PageRenderer, RenderSession};

/// Rules that drop listing links which are not real entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    /// Site routes that look like slugs (`categories`, `login`, ...).
    pub excluded_routes: Vec<String>,
    /// Case-insensitive substrings of slug or name that disqualify an entity.
    pub excluded_keywords: Vec<String>,
    /// Minimum advertised record count. Entities without a count pass.
    pub min_record_count: u64,
    /// Keep slugs spanning several path segments (`printful/reviews`).
    pub allow_nested: bool,
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self {
            excluded_routes: [
                "categories",
                "collections",
                "search",
                "login",
                "signup",
                "partners",
                "stories",
                "sitemap",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            excluded_keywords: Vec::new(),
            min_record_count: 1,
            allow_nested: false,
        }
    }
}

impl EntityFilter {
    /// Accept everything.
    pub fn permissive() -> Self {
        Self {
            excluded_routes: Vec::new(),
            excluded_keywords: Vec::new(),
            min_record_count: 0,
            allow_nested: true,
        }
    }

    /// Why `entity` is rejected, or `None` if it passes.
    pub fn rejection(&self, entity: &Entity) -> Option<&'static str> {
        let head = entity
            .slug
            .trim_start_matches('/')
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        if head.is_empty() {
            return Some("empty slug");
        }
        if self.excluded_routes.iter().any(|r| r == head) {
            return Some("site route");
        }
        if !self.allow_nested && entity.slug.trim_matches('/').contains('/') {
            return Some("nested route");
        }

        let slug = entity.slug.to_lowercase();
        let name = entity.name.to_lowercase();
        if self.excluded_keywords.iter().any(|k| {
            let k = k.to_lowercase();
            !k.is_empty() && (slug.contains(&k) || name.contains(&k))
        }) {
            return Some("excluded keyword");
        }

        match entity.record_count {
            Some(count) if count < self.min_record_count => Some("below record threshold"),
            _ => None,
        }
    }
}

/// Configuration for [`EntityDiscoverer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// First page of the catalog listing.
    pub listing_url: String,
    /// Hard page bound, even if the "next" link never disappears.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub filter: EntityFilter,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_pages() -> u32 {
    50
}

impl DiscoveryConfig {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            max_pages: default_max_pages(),
            filter: EntityFilter::default(),
            throttle: ThrottleConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_filter(mut self, filter: EntityFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        url::Url::parse(&self.listing_url)
            .map_err(|e| AppError::Config(format!("Invalid listing URL {}: {e}", self.listing_url)))?;
        if self.max_pages == 0 {
            return Err(AppError::Config("max_pages must be at least 1".into()));
        }
        Ok(())
    }
}

/// Cursor and accumulator of a discovery in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryProgress {
    pub pages_visited: u32,
    /// Next listing page to fetch. `None` once pagination has ended.
    pub next_url: Option<String>,
    pub entities: Vec<Entity>,
}

impl DiscoveryProgress {
    fn start(listing_url: &str) -> Self {
        Self {
            pages_visited: 0,
            next_url: Some(listing_url.to_string()),
            entities: Vec::new(),
        }
    }
}

/// Written after the entity checkpoint when discovery finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMarker {
    pub completed_at: DateTime<Utc>,
    pub pages_visited: u32,
    pub entity_count: usize,
}

/// Drop repeated slugs, keeping the first occurrence.
pub fn dedupe_by_slug(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.slug.clone()))
        .collect()
}

/// Resolve a possibly relative link against the page it was found on.
pub(crate) fn resolve_link(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

pub struct EntityDiscoverer<E: Extractor> {
    extractor: E,
    config: DiscoveryConfig,
}

impl<E: Extractor> EntityDiscoverer<E> {
    pub fn new(extractor: E, config: DiscoveryConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Produce the entity list, from the checkpoint when `resume` allows it.
    pub async fn discover<R: PageRenderer>(
        &self,
        renderer: &R,
        store: &CheckpointStore,
        resume: bool,
    ) -> Result<Vec<Entity>, AppError> {
        let mut progress = None;

        if resume {
            let existing: Vec<Entity> = store.load(ENTITIES, Vec::new());
            if !existing.is_empty() {
                tracing::info!(
                    entities = existing.len(),
                    "Discovery checkpoint found, skipping discovery"
                );
                return Ok(existing);
            }
            if let Some(marker) = store.try_load::<DiscoveryMarker>(DISCOVERY_COMPLETE) {
                if marker.entity_count == 0 {
                    tracing::info!(
                        completed_at = %marker.completed_at,
                        "Previous discovery completed with no entities"
                    );
                    return Ok(Vec::new());
                }
            }
            progress = store.try_load::<DiscoveryProgress>(DISCOVERY_PROGRESS);
            if let Some(p) = &progress {
                tracing::info!(
                    pages_visited = p.pages_visited,
                    entities = p.entities.len(),
                    "Resuming interrupted discovery"
                );
            }
        }

        let mut progress =
            progress.unwrap_or_else(|| DiscoveryProgress::start(&self.config.listing_url));
        if progress.next_url.is_some() {
            self.crawl(renderer, store, &mut progress).await?;
        }
        self.finish(store, progress)
    }

    async fn crawl<R: PageRenderer>(
        &self,
        renderer: &R,
        store: &CheckpointStore,
        progress: &mut DiscoveryProgress,
    ) -> Result<(), AppError> {
        let session = renderer.open().await?;

        let result = match session.new_page().await {
            Ok(page) => {
                let result = self.paginate(&page, store, progress).await;
                page.close().await;
                result
            }
            Err(e) => Err(e),
        };

        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close renderer session");
        }
        result
    }

    async fn paginate<P: PageHandle>(
        &self,
        page: &P,
        store: &CheckpointStore,
        progress: &mut DiscoveryProgress,
    ) -> Result<(), AppError> {
        let mut seen: HashSet<String> = progress.entities.iter().map(|e| e.slug.clone()).collect();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(url) = progress.next_url.clone() {
            if progress.pages_visited >= self.config.max_pages {
                tracing::warn!(
                    max_pages = self.config.max_pages,
                    "Reached listing page limit, stopping discovery"
                );
                progress.next_url = None;
                break;
            }

            let page_number = progress.pages_visited + 1;
            visited.insert(url.clone());

            let label = format!("listing page {page_number}");
            let rendered = with_retry(&self.config.retry, &label, || page.fetch(&url)).await?;

            let extraction = self.extractor.extract_entities(&rendered);
            let found = extraction.value.len();
            let mut new_count = 0usize;
            let mut rejected = 0usize;
            for entity in extraction.value {
                if let Some(reason) = self.config.filter.rejection(&entity) {
                    tracing::debug!(slug = %entity.slug, %reason, "Entity rejected");
                    rejected += 1;
                    continue;
                }
                if seen.insert(entity.slug.clone()) {
                    progress.entities.push(entity);
                    new_count += 1;
                }
            }
            progress.pages_visited = page_number;

            tracing::info!(
                page = page_number,
                strategy = %extraction.strategy,
                found,
                new = new_count,
                rejected,
                total = progress.entities.len(),
                "Listing page processed"
            );

            progress.next_url = if page_number > 1 && new_count == 0 {
                tracing::info!(page = page_number, "No new entities, stopping discovery");
                None
            } else {
                match self.extractor.find_next_page(&rendered) {
                    Some(href) => {
                        let next = resolve_link(&rendered.url, &href);
                        if visited.contains(&next) {
                            tracing::warn!(%next, "Next link points to a visited page, stopping");
                            None
                        } else {
                            Some(next)
                        }
                    }
                    None => {
                        tracing::info!(page = page_number, "No next page, discovery complete");
                        None
                    }
                }
            };

            store.save(DISCOVERY_PROGRESS, &*progress)?;

            if progress.next_url.is_some() {
                throttled_delay(&self.config.throttle).await;
            }
        }

        Ok(())
    }

    fn finish(
        &self,
        store: &CheckpointStore,
        progress: DiscoveryProgress,
    ) -> Result<Vec<Entity>, AppError> {
        let pages_visited = progress.pages_visited;
        let entities = dedupe_by_slug(progress.entities);

        store.save(ENTITIES, &entities)?;
        store.save(
            DISCOVERY_COMPLETE,
            &DiscoveryMarker {
                completed_at: Utc::now(),
                pages_visited,
                entity_count: entities.len(),
            },
        )?;
        store.remove(DISCOVERY_PROGRESS)?;

        tracing::info!(
            entities = entities.len(),
            pages = pages_visited,
            "Discovery finished"
        );
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{MockExtractor, MockPage, MockRenderer};

    const LISTING: &str = "https://catalog.test/browse";

    fn page_url(n: u32) -> String {
        format!("{LISTING}?page={n}")
    }

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig::new(LISTING)
            .with_filter(EntityFilter::permissive())
            .with_throttle(ThrottleConfig::none())
            .with_retry(RetryPolicy::new(2, Duration::ZERO))
    }

    fn slugs(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.slug.as_str()).collect()
    }

    #[tokio::test]
    async fn overlapping_pages_dedupe_in_first_seen_order() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a", "b"]).with_next(page_url(2)))
            .with_page(&page_url(2), MockPage::listing(&["b", "c"]));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b", "c"]);
        let saved: Vec<Entity> = store.load(ENTITIES, Vec::new());
        assert_eq!(saved, entities);
        let marker: DiscoveryMarker = store.try_load(DISCOVERY_COMPLETE).unwrap();
        assert_eq!(marker.entity_count, 3);
        assert_eq!(marker.pages_visited, 2);
        assert!(!store.exists(DISCOVERY_PROGRESS));
    }

    #[tokio::test]
    async fn relative_next_link_is_resolved() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a"]).with_next("?page=2"))
            .with_page(&page_url(2), MockPage::listing(&["b"]));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, false)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b"]);
        assert_eq!(renderer.fetched(), vec![LISTING.to_string(), page_url(2)]);
    }

    #[tokio::test]
    async fn page_without_new_entities_stops_discovery() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a", "b"]).with_next(page_url(2)))
            .with_page(&page_url(2), MockPage::listing(&["a", "b"]).with_next(page_url(3)))
            .with_page(&page_url(3), MockPage::listing(&["z"]));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b"]);
        assert_eq!(renderer.fetch_count(), 2);
    }

    #[tokio::test]
    async fn max_pages_bounds_an_endless_listing() {
        let mut renderer = MockRenderer::new().with_page(
            LISTING,
            MockPage::listing(&["e1"]).with_next(page_url(2)),
        );
        for n in 2..10 {
            let slug = format!("e{n}");
            renderer = renderer.with_page(
                &page_url(n),
                MockPage::listing(&[slug.as_str()]).with_next(page_url(n + 1)),
            );
        }
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config().with_max_pages(3))
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["e1", "e2", "e3"]);
        assert_eq!(renderer.fetch_count(), 3);
    }

    #[tokio::test]
    async fn next_link_cycle_is_detected() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a"]).with_next(page_url(2)))
            .with_page(&page_url(2), MockPage::listing(&["b"]).with_next(LISTING));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b"]);
        assert_eq!(renderer.fetch_count(), 2);
    }

    #[tokio::test]
    async fn existing_checkpoint_skips_discovery_entirely() {
        let renderer = MockRenderer::new();
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let existing = vec![Entity::new("printful", "Printful")];
        store.save(ENTITIES, &existing).unwrap();

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(entities, existing);
        assert_eq!(renderer.sessions_opened(), 0);
        assert_eq!(renderer.fetch_count(), 0);
    }

    #[tokio::test]
    async fn resume_disabled_ignores_checkpoint() {
        let renderer = MockRenderer::new().with_page(LISTING, MockPage::listing(&["fresh"]));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(ENTITIES, &vec![Entity::new("stale", "Stale")]).unwrap();

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, false)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["fresh"]);
        let saved: Vec<Entity> = store.load(ENTITIES, Vec::new());
        assert_eq!(slugs(&saved), vec!["fresh"]);
    }

    #[tokio::test]
    async fn completed_empty_discovery_is_not_repeated() {
        let renderer = MockRenderer::new().with_page(LISTING, MockPage::new());
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let discoverer = EntityDiscoverer::new(MockExtractor, test_config());

        let first = discoverer.discover(&renderer, &store, true).await.unwrap();
        assert!(first.is_empty());
        assert_eq!(renderer.fetch_count(), 1);

        let second = discoverer.discover(&renderer, &store, true).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(renderer.fetch_count(), 1);
    }

    #[tokio::test]
    async fn interrupted_discovery_resumes_from_cursor() {
        let renderer = MockRenderer::new()
            .with_page(&page_url(2), MockPage::listing(&["b", "c"]));
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save(
                DISCOVERY_PROGRESS,
                &DiscoveryProgress {
                    pages_visited: 1,
                    next_url: Some(page_url(2)),
                    entities: vec![Entity::new("a", "a"), Entity::new("b", "b")],
                },
            )
            .unwrap();

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b", "c"]);
        assert_eq!(renderer.fetched(), vec![page_url(2)]);
    }

    #[tokio::test]
    async fn finished_progress_is_finalized_without_fetching() {
        let renderer = MockRenderer::new();
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save(
                DISCOVERY_PROGRESS,
                &DiscoveryProgress {
                    pages_visited: 4,
                    next_url: None,
                    entities: vec![Entity::new("a", "a")],
                },
            )
            .unwrap();

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a"]);
        assert_eq!(renderer.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a"]))
            .failing(LISTING, 1);
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a"]);
        assert_eq!(renderer.fetch_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_discovery_and_release_resources() {
        let renderer = MockRenderer::new()
            .with_page(LISTING, MockPage::listing(&["a"]).with_next(page_url(2)))
            .failing(&page_url(2), 5);
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let err = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Navigation { .. }));
        assert_eq!(renderer.sessions_closed(), 1);
        assert_eq!(renderer.pages_closed(), 1);
        assert!(!store.exists(ENTITIES));
        let progress: DiscoveryProgress = store.try_load(DISCOVERY_PROGRESS).unwrap();
        assert_eq!(progress.pages_visited, 1);
        assert_eq!(progress.next_url, Some(page_url(2)));
    }

    #[tokio::test]
    async fn filter_drops_routes_keywords_and_unreviewed_entities() {
        let filter = EntityFilter {
            excluded_keywords: vec!["Dropship".into()],
            ..EntityFilter::default()
        };
        let page = MockPage::new().with_entities(vec![
            Entity::new("printful", "Printful").with_record_count(120),
            Entity::new("categories", "Categories"),
            Entity::new("login", "Log in"),
            Entity::new("quiet-app", "Quiet").with_record_count(0),
            Entity::new("dsers", "DSers Dropshipping").with_record_count(40),
            Entity::new("new-app", "New app"),
        ]);
        let renderer = MockRenderer::new().with_page(LISTING, page);
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config().with_filter(filter))
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["printful", "new-app"]);
    }

    #[tokio::test]
    async fn fallback_tier_results_are_kept() {
        let renderer =
            MockRenderer::new().with_page(LISTING, MockPage::listing(&["a", "b"]).as_fallback());
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let entities = EntityDiscoverer::new(MockExtractor, test_config())
            .discover(&renderer, &store, true)
            .await
            .unwrap();

        assert_eq!(slugs(&entities), vec!["a", "b"]);
    }

    #[test]
    fn rejection_reasons() {
        let filter = EntityFilter::default();
        assert_eq!(
            filter.rejection(&Entity::new("search?q=x", "Search")),
            Some("site route")
        );
        assert_eq!(filter.rejection(&Entity::new("", "Nothing")), Some("empty slug"));
        assert_eq!(
            filter.rejection(&Entity::new("categories/store-design", "Store design")),
            Some("site route")
        );
        assert_eq!(
            filter.rejection(&Entity::new("printful/reviews", "Reviews")),
            Some("nested route")
        );
        assert_eq!(
            EntityFilter::permissive().rejection(&Entity::new("printful/reviews", "Reviews")),
            None
        );
        assert_eq!(
            filter.rejection(&Entity::new("app", "App").with_record_count(0)),
            Some("below record threshold")
        );
        assert_eq!(filter.rejection(&Entity::new("app", "App")), None);
    }

    #[test]
    fn config_validation() {
        assert!(DiscoveryConfig::new("https://catalog.test").validate().is_ok());
        assert!(matches!(
            DiscoveryConfig::new("not a url").validate(),
            Err(AppError::Config(_))
        ));
        assert!(
            DiscoveryConfig::new("https://catalog.test")
                .with_max_pages(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn partial_filter_config_keeps_default_routes() {
        let filter: EntityFilter =
            serde_json::from_str(r#"{ "excluded_keywords": ["Theme"] }"#).unwrap();

        assert_eq!(filter.min_record_count, 1);
        assert_eq!(
            filter.rejection(&Entity::new("login", "Log in")),
            Some("site route")
        );
        assert_eq!(
            filter.rejection(&Entity::new("dawn", "Dawn theme")),
            Some("excluded keyword")
        );
    }
}
