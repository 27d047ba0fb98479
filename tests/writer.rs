use osm2graph::geometry::{EdgeDraft, MemoryPointLookup, PointLookup, edge_draft};
use osm2graph::normalize::{ItemKind, NormalizedItem};
use osm2graph::{
    BatchConfig, GraphStore, GraphWriter, LookupError, PropertySet, RecordOutcome, SkipReason,
    StoreConfig,
};
use tempfile::{TempDir, tempdir};

async fn open_store() -> (TempDir, GraphStore) {
    let dir = tempdir().expect("tempdir");
    let store = GraphStore::connect(&StoreConfig::sqlite(dir.path().join("graph.db")))
        .await
        .expect("connect");
    (dir, store)
}

fn point(osm_id: i64, lon: f64, lat: f64) -> PropertySet {
    let mut props = PropertySet::new();
    props.insert("osm_id", osm_id);
    props.insert("lon", lon);
    props.insert("lat", lat);
    props
}

async fn draft(start_id: i64, end_id: i64) -> EdgeDraft {
    let mut lookup = MemoryPointLookup::new();
    lookup.insert(start_id, 0.0, 0.0);
    lookup.insert(end_id, 0.0, 0.001);

    let mut properties = PropertySet::new();
    properties.insert("osm_id", 500i64);
    properties.insert("highway", "residential");
    let road = NormalizedItem {
        kind: ItemKind::Road,
        osm_id: 500,
        properties,
        members: vec![start_id, end_id],
    };
    edge_draft(&road, 0, 1, &lookup).await.expect("draft")
}

#[tokio::test]
async fn commits_once_the_threshold_is_exceeded() {
    let (_dir, store) = open_store().await;
    let batch = BatchConfig {
        commit_threshold: 2,
        node_cost: 1,
        edge_cost: 500,
    };
    let mut writer = GraphWriter::new(store.clone(), batch).await.expect("writer");

    for id in 1..=3 {
        let outcome = writer.create_point(&point(id, 0.0, id as f64)).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Written);
    }
    assert_eq!(writer.stats().commits, 1);
    assert_eq!(writer.pending_cost(), 0);
    assert_eq!(store.count_nodes().await.unwrap(), 3);

    writer.create_point(&point(4, 0.0, 4.0)).await.unwrap();
    assert_eq!(writer.pending_cost(), 1);
    // the fourth point is still in the open batch
    assert_eq!(store.count_nodes().await.unwrap(), 3);

    let stats = writer.shutdown().await.expect("shutdown");
    assert_eq!(stats.points_written, 4);
    assert_eq!(stats.commits, 2);
    assert_eq!(store.count_nodes().await.unwrap(), 4);
}

#[tokio::test]
async fn edge_cost_dominates_the_default_batch() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();
    writer.create_point(&point(2, 0.0, 0.001)).await.unwrap();

    // endpoints are resolved inside the open batch, before any commit
    let draft = draft(1, 2).await;
    for _ in 0..10 {
        assert!(writer.create_edge(&draft).await.unwrap().is_written());
    }
    // 2 + 10 * 500 = 5002 > 5000
    assert_eq!(writer.stats().commits, 1);
    assert_eq!(writer.pending_cost(), 0);
    assert_eq!(store.count_edges().await.unwrap(), 10);
    writer.shutdown().await.unwrap();
}

#[tokio::test]
async fn edge_with_missing_endpoint_is_skipped() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();

    let outcome = writer.create_edge(&draft(1, 2).await).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::MissingEndpoint(2)));
    let outcome = writer.create_edge(&draft(3, 1).await).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::MissingEndpoint(3)));
    // skipped edges are charged like written ones
    assert_eq!(writer.pending_cost(), 1 + 2 * 500);

    let stats = writer.shutdown().await.unwrap();
    assert_eq!(stats.edges_skipped, 2);
    assert_eq!(stats.edges_written, 0);
    assert_eq!(store.count_edges().await.unwrap(), 0);
}

#[tokio::test]
async fn point_without_coordinate_is_skipped() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");

    let mut props = PropertySet::new();
    props.insert("osm_id", 9i64);
    props.insert("lat", 1.0);
    let outcome = writer.create_point(&props).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::MissingCoordinate));
    assert_eq!(writer.pending_cost(), 1);

    writer.shutdown().await.unwrap();
    assert_eq!(store.count_nodes().await.unwrap(), 0);
}

#[tokio::test]
async fn skipped_records_count_toward_the_batch() {
    let (_dir, store) = open_store().await;
    let batch = BatchConfig {
        commit_threshold: 1000,
        node_cost: 1,
        edge_cost: 500,
    };
    let mut writer = GraphWriter::new(store.clone(), batch).await.expect("writer");
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();

    let missing = draft(1, 2).await;
    writer.create_edge(&missing).await.unwrap();
    assert_eq!(writer.stats().commits, 0);
    assert_eq!(writer.pending_cost(), 501);

    // 1 + 2 * 500 = 1001 > 1000
    writer.create_edge(&missing).await.unwrap();
    assert_eq!(writer.stats().commits, 1);
    assert_eq!(writer.pending_cost(), 0);
    assert_eq!(writer.stats().edges_skipped, 2);
    assert_eq!(writer.stats().edges_written, 0);
    assert_eq!(store.count_nodes().await.unwrap(), 1);

    let mut no_coordinate = PropertySet::new();
    no_coordinate.insert("osm_id", 9i64);
    writer.create_point(&no_coordinate).await.unwrap();
    assert_eq!(writer.pending_cost(), 1);

    writer.shutdown().await.unwrap();
}

#[tokio::test]
async fn duplicate_point_rolls_back_alone() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    writer.create_indexes(true).await.expect("indexes");

    assert!(writer.create_point(&point(1, 0.0, 0.0)).await.unwrap().is_written());
    let outcome = writer.create_point(&point(1, 1.0, 1.0)).await.unwrap();
    assert!(matches!(outcome, RecordOutcome::Skipped(SkipReason::Rejected(_))));
    assert!(writer.create_point(&point(2, 0.0, 0.001)).await.unwrap().is_written());

    writer.shutdown().await.unwrap();
    assert_eq!(store.count_nodes().await.unwrap(), 2);
}

#[tokio::test]
async fn store_lookup_sees_committed_points_and_flags_duplicates() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    let lookup = store.point_lookup();

    writer.create_point(&point(1, -122.5, 37.75)).await.unwrap();
    assert!(matches!(lookup.lookup(1).await, Err(LookupError::NotFound(1))));

    writer.commit().await.unwrap();
    let coord = lookup.lookup(1).await.expect("committed point");
    assert_eq!((coord.x, coord.y), (-122.5, 37.75));

    // no unique index yet, so a duplicate can get in
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();
    writer.commit().await.unwrap();
    assert!(matches!(lookup.lookup(1).await, Err(LookupError::Ambiguous(1))));
    assert!(matches!(lookup.lookup(7).await, Err(LookupError::NotFound(7))));

    writer.shutdown().await.unwrap();
}

#[tokio::test]
async fn truncation_commits_immediately() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();
    writer.create_point(&point(2, 0.0, 0.001)).await.unwrap();
    writer.create_edge(&draft(1, 2).await).await.unwrap();
    writer.create_edge(&draft(2, 1).await).await.unwrap();

    assert_eq!(writer.truncate_edges().await.unwrap(), 2);
    assert_eq!(store.count_edges().await.unwrap(), 0);
    assert_eq!(store.count_nodes().await.unwrap(), 2);

    writer.create_edge(&draft(1, 2).await).await.unwrap();
    assert_eq!(writer.truncate_nodes().await.unwrap(), 2);
    assert_eq!(store.count_nodes().await.unwrap(), 0);
    assert_eq!(store.count_edges().await.unwrap(), 0);
    assert_eq!(writer.pending_cost(), 0);

    writer.shutdown().await.unwrap();
}

#[tokio::test]
async fn dropping_absent_indexes_is_not_an_error() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");

    writer.drop_indexes().await.expect("drop on a fresh store");
    writer.create_indexes(false).await.expect("create");
    writer.drop_indexes().await.expect("drop existing");
    writer.drop_indexes().await.expect("drop again");
    assert_eq!(store.count_nodes().await.unwrap(), 0);
    assert_eq!(store.count_edges().await.unwrap(), 0);

    writer.shutdown().await.unwrap();
}

#[tokio::test]
async fn abort_discards_the_open_batch() {
    let (_dir, store) = open_store().await;
    let mut writer = GraphWriter::new(store.clone(), BatchConfig::default())
        .await
        .expect("writer");
    writer.create_point(&point(1, 0.0, 0.0)).await.unwrap();
    writer.commit().await.unwrap();
    writer.create_point(&point(2, 0.0, 0.001)).await.unwrap();

    let stats = writer.abort().await.unwrap();
    assert_eq!(stats.points_written, 2);
    assert_eq!(store.count_nodes().await.unwrap(), 1);
    assert!(store.find_point(2).await.unwrap().is_none());
}
