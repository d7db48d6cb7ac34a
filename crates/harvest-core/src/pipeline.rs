use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, ENTITIES};
use crate::collect::{CollectionConfig, CollectionScraper};
use crate::discover::{DiscoveryConfig, EntityDiscoverer};
use crate::error::AppError;
use crate::models::Entity;
use crate::output::{OutputConfig, OutputWriter};
use crate::traits::{Extractor, PageRenderer};

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Discover,
    Collect,
    #[default]
    Full,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Discover => "discover",
            RunMode::Collect => "collect",
            RunMode::Full => "full",
        }
    }

    pub fn discovers(&self) -> bool {
        matches!(self, RunMode::Discover | RunMode::Full)
    }

    pub fn collects(&self) -> bool {
        matches!(self, RunMode::Collect | RunMode::Full)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discover" => Ok(RunMode::Discover),
            "collect" => Ok(RunMode::Collect),
            "full" => Ok(RunMode::Full),
            _ => Err(format!("Unknown run mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub discovery: DiscoveryConfig,
    pub collection: CollectionConfig,
    pub output: OutputConfig,
    pub checkpoint_dir: PathBuf,
    /// Honour existing checkpoints. When false every phase starts over.
    pub resume: bool,
}

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entities: usize,
    /// Records in the final output (previous runs included).
    pub records: usize,
    /// Entities collected during this run.
    pub collected: usize,
    /// Entities skipped after failing.
    pub failed: Vec<String>,
}

/// Orchestrates discovery, collection and the final write.
///
/// Generic over the extractor so the same pipeline runs against the
/// selector-driven extractor in production and the mocks in tests.
pub struct Pipeline<E: Extractor> {
    discoverer: EntityDiscoverer<E>,
    scraper: CollectionScraper<E>,
    store: CheckpointStore,
    writer: OutputWriter,
    resume: bool,
}

impl<E: Extractor> Pipeline<E> {
    pub fn new(extractor: E, config: PipelineConfig) -> Result<Self, AppError> {
        config.discovery.validate()?;
        config.collection.validate()?;
        config.output.validate()?;

        Ok(Self {
            discoverer: EntityDiscoverer::new(extractor.clone(), config.discovery),
            scraper: CollectionScraper::new(extractor, config.collection),
            store: CheckpointStore::new(config.checkpoint_dir),
            writer: OutputWriter::new(config.output),
            resume: config.resume,
        })
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn run<R: PageRenderer>(
        &self,
        mode: RunMode,
        renderer: &R,
    ) -> Result<RunSummary, AppError> {
        tracing::info!(%mode, resume = self.resume, "Starting run");

        let entities = if mode.discovers() {
            let entities = self
                .discoverer
                .discover(renderer, &self.store, self.resume)
                .await?;
            if entities.is_empty() {
                return Err(AppError::NoEntities("discovery found no entities"));
            }
            self.writer.write_entities(&entities)?;
            entities
        } else {
            self.load_entities()?
        };

        let mut summary = RunSummary {
            entities: entities.len(),
            ..RunSummary::default()
        };
        if !mode.collects() {
            tracing::info!(entities = summary.entities, "Discovery finished");
            return Ok(summary);
        }

        let outcome = self
            .scraper
            .collect(renderer, &self.store, &entities, self.resume)
            .await?;
        self.writer.write_records(&outcome.records)?;

        summary.records = outcome.records.len();
        summary.collected = outcome.collected.len();
        summary.failed = outcome.failed;

        tracing::info!(
            entities = summary.entities,
            records = summary.records,
            collected = summary.collected,
            failed = summary.failed.len(),
            "Run finished"
        );
        Ok(summary)
    }

    fn load_entities(&self) -> Result<Vec<Entity>, AppError> {
        let entities: Vec<Entity> = self.store.load(ENTITIES, Vec::new());
        if entities.is_empty() {
            return Err(AppError::NoEntities(
                "no discovered entities to collect, run discovery first",
            ));
        }
        tracing::info!(entities = entities.len(), "Loaded discovery checkpoint");
        Ok(entities)
    }
}
