//! Retrieval tests: staged downloads and the consume-then-fetch ordering.

mod common;

use axum::http::StatusCode;
use common::{FaultyStorage, TestServer, seeded_bytes};
use dropit_server::pipeline::{RetrievalPipeline, StageArea};
use dropit_storage::ObjectStore;
use futures::StreamExt;
use std::sync::Arc;

fn staging_entries(server: &TestServer) -> usize {
    std::fs::read_dir(&server.state.config.server.staging_dir)
        .unwrap()
        .count()
}

#[tokio::test]
async fn test_download_stream_cleans_staging() {
    let server = TestServer::new().await;
    let data = seeded_bytes(3, 300_000);
    let file_id = server.upload("large.bin", &data, "", None).await;

    let response = server.download(&file_id, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data);

    assert_eq!(staging_entries(&server), 0);
}

#[tokio::test]
async fn test_fetch_streams_object_and_removes_stage_file() {
    let server = TestServer::new().await;
    let data = seeded_bytes(9, 70_000);
    let file_id = server.upload("photo.png", &data, "", None).await;
    let record = server
        .metadata()
        .find_by_id(dropit_core::FileId::parse(&file_id).unwrap())
        .await
        .unwrap()
        .unwrap();

    let download = server.state.retrieval.fetch(&record).await.unwrap();
    assert_eq!(download.filename, "photo.png");
    assert_eq!(download.content_type, "text/plain");
    assert_eq!(download.size_bytes, 70_000);
    assert_eq!(staging_entries(&server), 1);

    let mut body = download.body;
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, data.as_ref());
    assert_eq!(staging_entries(&server), 0);
}

#[tokio::test]
async fn test_abandoned_download_removes_stage_file() {
    let server = TestServer::new().await;
    let file_id = server
        .upload("a.bin", &seeded_bytes(4, 200_000), "", None)
        .await;
    let record = server
        .metadata()
        .find_by_id(dropit_core::FileId::parse(&file_id).unwrap())
        .await
        .unwrap()
        .unwrap();

    let download = server.state.retrieval.fetch(&record).await.unwrap();
    let mut body = download.body;
    let _first = body.next().await.unwrap().unwrap();
    drop(body);

    assert_eq!(staging_entries(&server), 0);
}

#[tokio::test]
async fn test_failed_fetch_cleans_staging() {
    let temp = tempfile::tempdir().unwrap();
    let storage = FaultyStorage::new(&temp.path().join("objects")).await;
    let stage = Arc::new(StageArea::new(temp.path().join("staging")).await.unwrap());
    storage.ensure_container("files").await.unwrap();

    let record = common::sample_record("missing.txt");
    let pipeline = RetrievalPipeline::new(storage.clone(), stage, "files".to_string());

    assert!(pipeline.fetch(&record).await.is_err());
    assert_eq!(
        std::fs::read_dir(temp.path().join("staging")).unwrap().count(),
        0
    );
}

/// A grant is counted before the object is fetched. When the fetch fails
/// the download stays consumed.
#[tokio::test]
async fn failed_fetch_still_consumes_download() {
    let temp = tempfile::tempdir().unwrap();
    let storage = FaultyStorage::new(&temp.path().join("objects")).await;
    let server = TestServer::with_storage(storage.clone()).await;

    let file_id = server
        .upload("once.txt", b"only once", "download_limit=1", None)
        .await;

    FaultyStorage::set(&storage.fail_get, true);
    let response = server.download(&file_id, None).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);

    FaultyStorage::set(&storage.fail_get, false);
    let response = server.download(&file_id, None).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert_eq!(response.json()["code"], "download_limit_reached");

    let record = server
        .metadata()
        .find_by_id(dropit_core::FileId::parse(&file_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.download_count, 1);
    assert!(record.marked_for_deletion);
}
