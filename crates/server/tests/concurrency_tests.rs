//! Concurrent downloads must never exceed the download limit.

mod common;

use common::{TestMetadata, TestServer, fast_hasher, run_metadata_test_both, sample_record};
use dropit_metadata::ConsumeOutcome;
use dropit_server::{AccessPolicyEngine, Authorization};
use std::sync::Arc;
use time::OffsetDateTime;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_increments_respect_limit() {
    run_metadata_test_both(|store| async move {
        let mut record = sample_record("race.txt");
        record.download_limit = 5;
        store.insert_file(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            let id = record.id;
            handles.push(tokio::spawn(async move {
                store
                    .increment_download_count_if_under_limit(id, OffsetDateTime::now_utc())
                    .await
                    .unwrap()
            }));
        }

        let mut consumed = Vec::new();
        let mut exhausted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ConsumeOutcome::Consumed {
                    download_count,
                    exhausted: last,
                } => {
                    consumed.push(download_count);
                    if last {
                        exhausted += 1;
                    }
                }
                ConsumeOutcome::LimitReached => refused += 1,
                ConsumeOutcome::NotFound => panic!("record vanished"),
            }
        }

        consumed.sort_unstable();
        assert_eq!(consumed, vec![1, 2, 3, 4, 5]);
        assert_eq!(exhausted, 1);
        assert_eq!(refused, 35);

        let stored = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.download_count, 5);
        assert!(stored.marked_for_deletion);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_authorizations_grant_exactly_limit() {
    let metadata = TestMetadata::new().await.unwrap();
    let engine = Arc::new(AccessPolicyEngine::new(metadata.store(), fast_hasher()));

    let mut record = sample_record("contested.txt");
    record.download_limit = 3;
    metadata.store().insert_file(&record).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        let id = record.id;
        handles.push(tokio::spawn(async move {
            engine.authorize_download(id, None).await.unwrap()
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if let Authorization::Granted(_) = handle.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_http_downloads() {
    let server = Arc::new(TestServer::new().await);
    let file_id = server
        .upload("hot.txt", b"popular", "download_limit=2", None)
        .await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let server = server.clone();
        let file_id = file_id.clone();
        handles.push(tokio::spawn(async move {
            server.download(&file_id, None).await.status
        }));
    }

    let mut ok = 0;
    let mut gone = 0;
    for handle in handles {
        match handle.await.unwrap().as_u16() {
            200 => ok += 1,
            410 => gone += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(gone, 8);
}
