pub mod checkpoint;
pub mod collect;
pub mod discover;
pub mod error;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod testutil;
pub mod throttle;
pub mod traits;

pub use checkpoint::CheckpointStore;
pub use collect::{CollectionConfig, CollectionOutcome, CollectionScraper, FailurePolicy};
pub use discover::{DiscoveryConfig, EntityDiscoverer, EntityFilter};
pub use error::AppError;
pub use models::{
    CountHint, CountSource, Entity, Extraction, FieldValue, Record, RenderedPage, Strategy,
};
pub use output::{OutputConfig, OutputWriter};
pub use pipeline::{Pipeline, PipelineConfig, RunMode, RunSummary};
pub use throttle::{RetryPolicy, ThrottleConfig};
pub use traits::{Extractor, PageHandle, PageRenderer, RenderSession};
