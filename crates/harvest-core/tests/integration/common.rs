use std::path::Path;
use std::time::Duration;

use harvest_core::testutil::{MockExtractor, MockPage, MockRenderer};
use harvest_core::{
    CollectionConfig, DiscoveryConfig, OutputConfig, Pipeline, PipelineConfig, RetryPolicy,
    ThrottleConfig,
};

pub const LISTING: &str = "https://apps.test/browse";

pub fn review_url(slug: &str, page: u32) -> String {
    format!("https://apps.test/{slug}/reviews?page={page}")
}

/// Pipeline with delays disabled and millisecond retries, rooted at `dir`.
pub fn pipeline(dir: &Path, resume: bool) -> Pipeline<MockExtractor> {
    let retry = RetryPolicy::new(3, Duration::from_millis(1));
    let config = PipelineConfig {
        discovery: DiscoveryConfig::new(LISTING)
            .with_throttle(ThrottleConfig::none())
            .with_retry(retry),
        collection: CollectionConfig::new("https://apps.test/{slug}/reviews?page={page}")
            .with_throttle(ThrottleConfig::none())
            .with_entity_delay(ThrottleConfig::none())
            .with_retry(retry),
        output: OutputConfig::new(dir.join("output")).with_columns(["n"]),
        checkpoint_dir: dir.join("checkpoints"),
        resume,
    };
    Pipeline::new(MockExtractor, config).unwrap()
}

/// Three entities with 2, 1 and 3 records across one or two pages.
pub fn three_entity_site() -> MockRenderer {
    MockRenderer::new()
        .with_page(
            LISTING,
            MockPage::listing(&["alpha", "beta"]).with_next("/browse?page=2"),
        )
        .with_page(
            "https://apps.test/browse?page=2",
            MockPage::listing(&["beta", "gamma"]),
        )
        .with_page(&review_url("alpha", 1), MockPage::records(1, 2))
        .with_page(&review_url("beta", 1), MockPage::records(10, 1))
        .with_page(
            &review_url("gamma", 1),
            MockPage::records(20, 2).with_next("?page=2"),
        )
        .with_page(&review_url("gamma", 2), MockPage::records(22, 1))
}
