//! Phase two: paginate each entity's record listing.
//!
//! # Per-entity states
//!
//! ```text
//! Start --page 1--> CountKnown(total_pages) --+
//!              \                               +--> Paginating --> Done
//!               --> CountUnknown(cap) --------+
//! ```
//!
//! Pagination stops, checked in this order each page, when the extracted
//! batch is empty, when the known page count is reached, or when the page
//! shows no "next" link. A stale count hint never outlives an empty page.
//!
//! # Persistence order
//!
//! After each entity: per-entity record file, then the combined record
//! checkpoint, then the scraped-slug set. A slug only becomes "scraped" once
//! both record files are on disk, so a crash at any point leaves the entity
//! to be collected again rather than silently lost.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, RECORDS_COMBINED, SCRAPED_SLUGS, entity_key};
use crate::error::AppError;
use crate::models::{Entity, Record};
use crate::output::{flatten, group_by_entity};
use crate::throttle::{RetryPolicy, ThrottleConfig, throttled_delay, with_retry};
use crate::traits::{Extractor, PageHandle, PageRenderer, RenderSession};

/// What to do when an entity fails after its retries are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run. The failed entity stays unmarked.
    #[default]
    Abort,
    /// Log, leave the entity unmarked for the next run, and continue.
    Skip,
}

/// Configuration for [`CollectionScraper`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection page URL with `{slug}` and `{page}` placeholders.
    pub url_template: String,
    /// Records per collection page, used with the count hint.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Page cap when no count hint is available. A backstop only.
    #[serde(default = "default_max_pages_fallback")]
    pub max_pages_fallback: u32,
    /// Delay between collection pages of one entity.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Delay between entities.
    #[serde(default)]
    pub entity_delay: ThrottleConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_per_page() -> u32 {
    10
}

fn default_max_pages_fallback() -> u32 {
    500
}

impl CollectionConfig {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            per_page: default_per_page(),
            max_pages_fallback: default_max_pages_fallback(),
            throttle: ThrottleConfig::default(),
            entity_delay: ThrottleConfig::default(),
            retry: RetryPolicy::default(),
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn with_max_pages_fallback(mut self, cap: u32) -> Self {
        self.max_pages_fallback = cap;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_entity_delay(mut self, delay: ThrottleConfig) -> Self {
        self.entity_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// URL of collection page `page` (1-indexed) for `slug`.
    pub fn page_url(&self, slug: &str, page: u32) -> String {
        self.url_template
            .replace("{slug}", slug)
            .replace("{page}", &page.to_string())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.url_template.contains("{slug}") {
            return Err(AppError::Config(format!(
                "Collection URL template has no {{slug}} placeholder: {}",
                self.url_template
            )));
        }
        if self.per_page == 0 || self.max_pages_fallback == 0 {
            return Err(AppError::Config(
                "per_page and max_pages_fallback must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Page budget decided after reading the first collection page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBudget {
    CountKnown { total_records: u64, total_pages: u32 },
    CountUnknown { cap: u32 },
}

impl PageBudget {
    fn last_page(&self) -> u32 {
        match *self {
            PageBudget::CountKnown { total_pages, .. } => total_pages,
            PageBudget::CountUnknown { cap } => cap,
        }
    }
}

/// `ceil(total / per_page)`, never below one page.
pub fn total_pages(total_records: u64, per_page: u32) -> u32 {
    let per_page = u64::from(per_page.max(1));
    let pages = total_records.div_ceil(per_page).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Result of a collection run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    /// Every record collected so far, this run and previous ones.
    pub records: Vec<Record>,
    /// Slugs collected during this run.
    pub collected: Vec<String>,
    /// Slugs skipped after failing (left unmarked).
    pub failed: Vec<String>,
}

pub struct CollectionScraper<E: Extractor> {
    extractor: E,
    config: CollectionConfig,
}

/// Rebuild the combined records from per-entity files. Slugs whose file is
/// gone leave the scraped set and are collected again.
fn rebuild_combined(
    store: &CheckpointStore,
    entities: &[Entity],
    scraped: &mut BTreeSet<String>,
) -> Vec<Record> {
    let mut by_entity = BTreeMap::new();
    scraped.retain(|slug| match store.try_load::<Vec<Record>>(&entity_key(slug)) {
        Some(records) => {
            by_entity.insert(slug.clone(), records);
            true
        }
        None => {
            tracing::warn!(%slug, "Per-entity records missing, entity will be collected again");
            false
        }
    });
    tracing::warn!(
        entities = by_entity.len(),
        "Combined record checkpoint unreadable, rebuilt from per-entity files"
    );
    flatten(entities, &by_entity)
}

impl<E: Extractor> CollectionScraper<E> {
    pub fn new(extractor: E, config: CollectionConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Collect every entity not yet in the scraped-slug set.
    ///
    /// When nothing remains, the combined record checkpoint is returned as-is
    /// and no renderer session is opened.
    pub async fn collect<R: PageRenderer>(
        &self,
        renderer: &R,
        store: &CheckpointStore,
        entities: &[Entity],
        resume: bool,
    ) -> Result<CollectionOutcome, AppError> {
        let (mut scraped, previous) = if resume {
            let mut scraped = store.load::<BTreeSet<String>>(SCRAPED_SLUGS, BTreeSet::new());
            let previous = match store.try_load::<Vec<Record>>(RECORDS_COMBINED) {
                Some(records) => records,
                None if scraped.is_empty() => Vec::new(),
                None => {
                    let records = rebuild_combined(store, entities, &mut scraped);
                    store.save(RECORDS_COMBINED, &records)?;
                    records
                }
            };
            (scraped, previous)
        } else {
            (BTreeSet::new(), Vec::new())
        };

        let remaining: Vec<&Entity> = entities
            .iter()
            .filter(|e| !scraped.contains(&e.slug))
            .collect();

        if remaining.is_empty() {
            tracing::info!(
                entities = entities.len(),
                records = previous.len(),
                "All entities already collected, using combined checkpoint"
            );
            return Ok(CollectionOutcome {
                records: previous,
                ..CollectionOutcome::default()
            });
        }

        tracing::info!(
            remaining = remaining.len(),
            already_scraped = entities.len() - remaining.len(),
            "Starting collection"
        );

        let mut by_entity = group_by_entity(previous);
        let session = renderer.open().await?;
        let result = self
            .collect_remaining(
                &session,
                store,
                entities,
                &remaining,
                &mut scraped,
                &mut by_entity,
            )
            .await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close renderer session");
        }
        let (collected, failed) = result?;

        Ok(CollectionOutcome {
            records: flatten(entities, &by_entity),
            collected,
            failed,
        })
    }

    async fn collect_remaining<S: RenderSession>(
        &self,
        session: &S,
        store: &CheckpointStore,
        entities: &[Entity],
        remaining: &[&Entity],
        scraped: &mut BTreeSet<String>,
        by_entity: &mut BTreeMap<String, Vec<Record>>,
    ) -> Result<(Vec<String>, Vec<String>), AppError> {
        let mut collected = Vec::new();
        let mut failed = Vec::new();
        let total = remaining.len();

        for (i, entity) in remaining.iter().enumerate() {
            tracing::info!(
                slug = %entity.slug,
                position = i + 1,
                total,
                "Collecting entity"
            );

            match self.scrape_scoped(session, entity).await {
                Ok(records) => {
                    let count = records.len();
                    store.save(&entity_key(&entity.slug), &records)?;
                    by_entity.insert(entity.slug.clone(), records);
                    store.save(RECORDS_COMBINED, &flatten(entities, by_entity))?;
                    scraped.insert(entity.slug.clone());
                    store.save(SCRAPED_SLUGS, &*scraped)?;

                    tracing::info!(slug = %entity.slug, records = count, "Entity checkpointed");
                    collected.push(entity.slug.clone());
                }
                Err(e) if e.is_fatal() || self.config.on_failure == FailurePolicy::Abort => {
                    tracing::error!(slug = %entity.slug, error = %e, "Entity failed, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        slug = %entity.slug,
                        error = %e,
                        "Entity failed, skipping; it will be retried on the next run"
                    );
                    failed.push(entity.slug.clone());
                }
            }

            if i + 1 < total {
                throttled_delay(&self.config.entity_delay).await;
            }
        }

        Ok((collected, failed))
    }

    /// Scrape one entity on its own page handle, closed whatever the outcome.
    async fn scrape_scoped<S: RenderSession>(
        &self,
        session: &S,
        entity: &Entity,
    ) -> Result<Vec<Record>, AppError> {
        let page = session.new_page().await?;
        let result = self.scrape_entity(&page, entity).await;
        page.close().await;
        result
    }

    /// Paginate one entity's collection and return all its records.
    pub async fn scrape_entity<P: PageHandle>(
        &self,
        page: &P,
        entity: &Entity,
    ) -> Result<Vec<Record>, AppError> {
        let first_url = self.config.page_url(&entity.slug, 1);
        let label = format!("{} page 1", entity.slug);
        let mut rendered =
            with_retry(&self.config.retry, &label, || page.fetch(&first_url)).await?;

        let budget = match self.extractor.extract_total_count(&rendered) {
            Some(hint) => {
                let pages = total_pages(hint.total, self.config.per_page);
                tracing::info!(
                    slug = %entity.slug,
                    total = hint.total,
                    source = %hint.source,
                    pages,
                    "Record count known"
                );
                PageBudget::CountKnown {
                    total_records: hint.total,
                    total_pages: pages,
                }
            }
            None => {
                tracing::info!(
                    slug = %entity.slug,
                    cap = self.config.max_pages_fallback,
                    "Record count unknown, paginating until exhausted"
                );
                PageBudget::CountUnknown {
                    cap: self.config.max_pages_fallback,
                }
            }
        };

        let mut records = Vec::new();
        let mut page_number = 1u32;
        loop {
            if page_number > 1 {
                let url = self.config.page_url(&entity.slug, page_number);
                let label = format!("{} page {page_number}", entity.slug);
                rendered = with_retry(&self.config.retry, &label, || page.fetch(&url)).await?;
                throttled_delay(&self.config.throttle).await;
            }

            let batch = self.extractor.extract_records(&rendered, entity);
            tracing::debug!(
                slug = %entity.slug,
                page = page_number,
                records = batch.len(),
                "Collection page extracted"
            );

            if batch.is_empty() {
                tracing::debug!(slug = %entity.slug, page = page_number, "Empty page, done");
                break;
            }
            records.extend(batch);

            if page_number >= budget.last_page() {
                tracing::debug!(slug = %entity.slug, page = page_number, "Page budget reached");
                break;
            }
            if self.extractor.find_next_page(&rendered).is_none() {
                tracing::debug!(slug = %entity.slug, page = page_number, "No next page");
                break;
            }
            page_number += 1;
        }

        if let PageBudget::CountKnown { total_records, .. } = budget {
            if records.len() as u64 != total_records {
                tracing::debug!(
                    slug = %entity.slug,
                    expected = total_records,
                    collected = records.len(),
                    "Collected count differs from the count hint"
                );
            }
        }

        tracing::info!(
            slug = %entity.slug,
            pages = page_number,
            records = records.len(),
            "Entity collected"
        );
        Ok(records)
    }
}
