use harvest_core::checkpoint::{ENTITIES, RECORDS_COMBINED, SCRAPED_SLUGS, entity_key};
use harvest_core::testutil::{MockPage, MockRenderer};
use harvest_core::{Entity, Record, RunMode};

use crate::integration::common::{LISTING, pipeline, review_url, three_entity_site};

#[tokio::test]
async fn printful_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), true);
    pipeline
        .store()
        .save(ENTITIES, &vec![Entity::new("printful", "Printful")])
        .unwrap();
    let renderer = MockRenderer::new()
        .with_page(
            &review_url("printful", 1),
            MockPage::records(1, 2).with_next("?page=2"),
        )
        .with_page(&review_url("printful", 2), MockPage::records(3, 0));

    let summary = pipeline.run(RunMode::Full, &renderer).await.unwrap();

    assert_eq!(summary.entities, 1);
    assert_eq!(summary.records, 2);
    assert_eq!(
        renderer.fetched(),
        vec![review_url("printful", 1), review_url("printful", 2)]
    );

    let store = pipeline.store();
    let per_entity: Vec<Record> = store.load(&entity_key("printful"), Vec::new());
    assert_eq!(per_entity.len(), 2);
    let combined: Vec<Record> = store.load(RECORDS_COMBINED, Vec::new());
    assert_eq!(combined, per_entity);
    let scraped: Vec<String> = store.load(SCRAPED_SLUGS, Vec::new());
    assert_eq!(scraped, vec!["printful"]);

    let csv = std::fs::read_to_string(dir.path().join("output/records.csv")).unwrap();
    assert_eq!(csv, "entity,n\nprintful,1\nprintful,2\n");
}

#[tokio::test]
async fn full_run_over_paginated_listing() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = three_entity_site();

    let summary = pipeline(dir.path(), true)
        .run(RunMode::Full, &renderer)
        .await
        .unwrap();

    assert_eq!(summary.entities, 3);
    assert_eq!(summary.records, 6);
    assert_eq!(summary.collected, 3);

    let entities_csv =
        std::fs::read_to_string(dir.path().join("output/entities.csv")).unwrap();
    let slugs: Vec<&str> = entities_csv
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(slugs, vec!["alpha", "beta", "gamma"]);

    let records_csv = std::fs::read_to_string(dir.path().join("output/records.csv")).unwrap();
    let rows: Vec<&str> = records_csv.lines().skip(1).collect();
    assert_eq!(
        rows,
        vec![
            "alpha,1", "alpha,2", "beta,10", "gamma,20", "gamma,21", "gamma,22"
        ]
    );
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let first = three_entity_site();
    pipeline(dir.path(), true)
        .run(RunMode::Full, &first)
        .await
        .unwrap();
    let combined_path = dir.path().join("checkpoints/records_combined.json");
    let combined_before = std::fs::read(&combined_path).unwrap();
    let csv_before = std::fs::read(dir.path().join("output/records.csv")).unwrap();

    let second = three_entity_site();
    let summary = pipeline(dir.path(), true)
        .run(RunMode::Full, &second)
        .await
        .unwrap();

    assert_eq!(second.fetch_count(), 0);
    assert_eq!(second.sessions_opened(), 0);
    assert_eq!(summary.records, 6);
    assert_eq!(summary.collected, 0);
    assert_eq!(std::fs::read(&combined_path).unwrap(), combined_before);
    assert_eq!(
        std::fs::read(dir.path().join("output/records.csv")).unwrap(),
        csv_before
    );
}

#[tokio::test]
async fn no_resume_refetches_everything() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(dir.path(), true)
        .run(RunMode::Full, &three_entity_site())
        .await
        .unwrap();

    let renderer = three_entity_site();
    let summary = pipeline(dir.path(), false)
        .run(RunMode::Full, &renderer)
        .await
        .unwrap();

    assert_eq!(summary.collected, 3);
    assert_eq!(summary.records, 6);
    assert!(renderer.fetched().contains(&LISTING.to_string()));
    assert_eq!(renderer.fetch_count(), 2 + 4);
}
