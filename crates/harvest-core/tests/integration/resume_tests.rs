use std::collections::BTreeSet;

use harvest_core::checkpoint::{
    DISCOVERY_COMPLETE, DISCOVERY_PROGRESS, ENTITIES, RECORDS_COMBINED, SCRAPED_SLUGS,
    entity_key,
};
use harvest_core::discover::DiscoveryProgress;
use harvest_core::testutil::MockRenderer;
use harvest_core::{AppError, Entity, Record, RunMode};

use crate::integration::common::{LISTING, pipeline, review_url, three_entity_site};

#[tokio::test]
async fn resumes_after_interrupted_collection() {
    let dir = tempfile::tempdir().unwrap();
    // First run dies on gamma after its retries are exhausted.
    let broken = three_entity_site().failing(&review_url("gamma", 1), 3);
    let err = pipeline(dir.path(), true)
        .run(RunMode::Full, &broken)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Navigation { .. }));

    let store = pipeline(dir.path(), true).store().clone();
    let scraped: BTreeSet<String> = store.load(SCRAPED_SLUGS, BTreeSet::new());
    assert_eq!(scraped, BTreeSet::from(["alpha".into(), "beta".into()]));
    assert!(!store.exists(&entity_key("gamma")));

    let renderer = three_entity_site();
    let summary = pipeline(dir.path(), true)
        .run(RunMode::Full, &renderer)
        .await
        .unwrap();

    assert_eq!(
        renderer.fetched(),
        vec![review_url("gamma", 1), review_url("gamma", 2)]
    );
    assert_eq!(summary.collected, 1);
    assert_eq!(summary.records, 6);
    let combined: Vec<Record> = store.load(RECORDS_COMBINED, Vec::new());
    let owners: Vec<&str> = combined.iter().map(|r| r.entity.as_str()).collect();
    assert_eq!(
        owners,
        vec!["alpha", "alpha", "beta", "gamma", "gamma", "gamma"]
    );
}

#[tokio::test]
async fn resumes_discovery_from_progress_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let store = pipeline(dir.path(), true).store().clone();
    store
        .save(
            DISCOVERY_PROGRESS,
            &DiscoveryProgress {
                pages_visited: 1,
                next_url: Some("https://apps.test/browse?page=2".into()),
                entities: vec![Entity::new("alpha", "alpha"), Entity::new("beta", "beta")],
            },
        )
        .unwrap();

    let renderer = three_entity_site();
    let summary = pipeline(dir.path(), true)
        .run(RunMode::Discover, &renderer)
        .await
        .unwrap();

    assert_eq!(summary.entities, 3);
    assert_eq!(
        renderer.fetched(),
        vec!["https://apps.test/browse?page=2".to_string()]
    );
    assert!(!store.exists(DISCOVERY_PROGRESS));
    assert!(store.exists(DISCOVERY_COMPLETE));
    let entities: Vec<Entity> = store.load(ENTITIES, Vec::new());
    let slugs: Vec<&str> = entities.iter().map(|e| e.slug.as_str()).collect();
    assert_eq!(slugs, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn discovery_checkpoint_is_trusted() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(dir.path(), true)
        .store()
        .save(ENTITIES, &vec![Entity::new("beta", "Beta")])
        .unwrap();

    let renderer = three_entity_site();
    let summary = pipeline(dir.path(), true)
        .run(RunMode::Full, &renderer)
        .await
        .unwrap();

    assert_eq!(summary.entities, 1);
    assert!(!renderer.fetched().contains(&LISTING.to_string()));
    assert_eq!(renderer.fetched(), vec![review_url("beta", 1)]);
}

#[tokio::test]
async fn open_failure_leaves_checkpoints_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), true);
    p.store()
        .save(ENTITIES, &vec![Entity::new("alpha", "Alpha")])
        .unwrap();
    let renderer = MockRenderer::new().with_open_error(AppError::Browser("no chrome".into()));

    let err = p.run(RunMode::Collect, &renderer).await.unwrap_err();

    assert!(matches!(err, AppError::Browser(_)));
    assert!(!p.store().exists(SCRAPED_SLUGS));
    assert!(!p.store().exists(RECORDS_COMBINED));
}
