//! Maintenance sweep tests.

mod common;

use bytes::Bytes;
use common::{FaultyStorage, TestMetadata, sample_record};
use dropit_core::FileRecord;
use dropit_metadata::MetadataStore;
use dropit_server::sweep::{MaintenanceSweeper, SweepSettings};
use dropit_storage::ObjectStore;
use std::sync::Arc;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

const CONTAINER: &str = "files";

struct Harness {
    _temp: TempDir,
    storage: Arc<FaultyStorage>,
    metadata: TestMetadata,
}

impl Harness {
    async fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let storage = FaultyStorage::new(temp.path()).await;
        storage.ensure_container(CONTAINER).await.unwrap();
        let metadata = TestMetadata::new().await.unwrap();
        Self {
            _temp: temp,
            storage,
            metadata,
        }
    }

    fn store(&self) -> Arc<dyn MetadataStore> {
        self.metadata.store()
    }

    fn sweeper(&self, batch_size: u32, dry_run: bool) -> MaintenanceSweeper {
        MaintenanceSweeper::new(
            self.storage.clone(),
            self.store(),
            SweepSettings {
                container: CONTAINER.to_string(),
                batch_size,
                marked_grace: Duration::minutes(5),
                dry_run,
            },
        )
    }

    /// Store an object and its record.
    async fn add(&self, record: &FileRecord) {
        self.storage
            .put(CONTAINER, &record.storage_key, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        self.store().insert_file(record).await.unwrap();
    }

    async fn object_exists(&self, record: &FileRecord) -> bool {
        self.storage
            .exists(CONTAINER, &record.storage_key)
            .await
            .unwrap()
    }
}

fn expired(name: &str) -> FileRecord {
    let mut record = sample_record(name);
    record.size_bytes = 7;
    record.expires_at = Some(OffsetDateTime::now_utc() - Duration::hours(1));
    record
}

/// Exhaust a one-download file through the store so it gets marked.
async fn marked(harness: &Harness, name: &str) -> FileRecord {
    let mut record = sample_record(name);
    record.download_limit = 1;
    harness.add(&record).await;
    harness
        .store()
        .increment_download_count_if_under_limit(record.id, OffsetDateTime::now_utc())
        .await
        .unwrap();
    record
}

#[tokio::test]
async fn test_sweep_purges_expired_and_keeps_live() {
    let harness = Harness::new().await;
    let old = expired("old.txt");
    let live = sample_record("live.txt");
    let forever = {
        let mut record = sample_record("forever.txt");
        record.expires_at = None;
        record
    };
    harness.add(&old).await;
    harness.add(&live).await;
    harness.add(&forever).await;

    let stats = harness
        .sweeper(100, false)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.bytes_reclaimed, 7);
    assert!(harness.store().find_by_id(old.id).await.unwrap().is_none());
    assert!(!harness.object_exists(&old).await);
    assert!(harness.store().find_by_id(live.id).await.unwrap().is_some());
    assert!(harness.object_exists(&forever).await);
    assert_eq!(harness.store().count_files().await.unwrap(), 2);
}

#[tokio::test]
async fn test_marked_files_wait_for_grace_period() {
    let harness = Harness::new().await;
    let record = marked(&harness, "once.txt").await;
    let sweeper = harness.sweeper(100, false);

    let stats = sweeper.run(OffsetDateTime::now_utc()).await.unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.skipped, 1);
    assert!(harness.object_exists(&record).await);

    let later = OffsetDateTime::now_utc() + Duration::minutes(6);
    let stats = sweeper.run(later).await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert!(harness.store().find_by_id(record.id).await.unwrap().is_none());
    assert!(!harness.object_exists(&record).await);
}

#[tokio::test]
async fn test_dry_run_deletes_nothing() {
    let harness = Harness::new().await;
    let old = expired("old.txt");
    harness.add(&old).await;

    let stats = harness
        .sweeper(100, true)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.examined, 1);
    assert_eq!(stats.deleted, 0);
    assert!(harness.store().find_by_id(old.id).await.unwrap().is_some());
    assert!(harness.object_exists(&old).await);
}

#[tokio::test]
async fn test_missing_object_still_purges_record() {
    let harness = Harness::new().await;
    let orphan = expired("orphan.txt");
    harness.store().insert_file(&orphan).await.unwrap();

    let stats = harness
        .sweeper(100, false)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.errors, 0);
    assert!(harness.store().find_by_id(orphan.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_storage_failure_keeps_record_for_retry() {
    let harness = Harness::new().await;
    let old = expired("stuck.txt");
    harness.add(&old).await;
    FaultyStorage::set(&harness.storage.fail_delete, true);

    let sweeper = harness.sweeper(100, false);
    let stats = sweeper.run(OffsetDateTime::now_utc()).await.unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.errors, 1);
    assert!(harness.store().find_by_id(old.id).await.unwrap().is_some());

    FaultyStorage::set(&harness.storage.fail_delete, false);
    let stats = sweeper.run(OffsetDateTime::now_utc()).await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert!(harness.store().find_by_id(old.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_pages_through_batches() {
    let harness = Harness::new().await;
    for i in 0..7 {
        harness.add(&expired(&format!("batch-{i}.txt"))).await;
    }
    harness.add(&sample_record("keep.txt")).await;

    let stats = harness
        .sweeper(2, false)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.deleted, 7);
    assert_eq!(harness.store().count_files().await.unwrap(), 1);
}

#[tokio::test]
async fn test_records_in_grace_do_not_hide_expired_ones() {
    let harness = Harness::new().await;
    let waiting = [
        marked(&harness, "waiting-1.txt").await,
        marked(&harness, "waiting-2.txt").await,
    ];
    let mut old = Vec::new();
    for i in 0..3 {
        let record = expired(&format!("old-{i}.txt"));
        harness.add(&record).await;
        old.push(record);
    }

    let stats = harness
        .sweeper(2, false)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.examined, 5);
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.skipped, 2);
    for record in &old {
        assert!(harness.store().find_by_id(record.id).await.unwrap().is_none());
        assert!(!harness.object_exists(record).await);
    }
    for record in &waiting {
        assert!(harness.store().find_by_id(record.id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_dry_run_visits_every_page() {
    let harness = Harness::new().await;
    for i in 0..5 {
        harness.add(&expired(&format!("dry-{i}.txt"))).await;
    }

    let stats = harness
        .sweeper(1, true)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    assert_eq!(stats.examined, 5);
    assert_eq!(stats.skipped, 5);
    assert_eq!(harness.store().count_files().await.unwrap(), 5);
}

#[tokio::test]
async fn test_storage_failures_do_not_stall_paging() {
    let harness = Harness::new().await;
    for i in 0..5 {
        harness.add(&expired(&format!("stuck-{i}.txt"))).await;
    }
    FaultyStorage::set(&harness.storage.fail_delete, true);

    let stats = harness
        .sweeper(2, false)
        .run(OffsetDateTime::now_utc())
        .await
        .unwrap();

    // Every record was attempted once, and each failure left its record.
    assert_eq!(stats.examined, 5);
    assert_eq!(stats.errors, 5);
    assert_eq!(harness.store().count_files().await.unwrap(), 5);
}

#[tokio::test]
async fn test_purge_reports_missing_record() {
    let harness = Harness::new().await;
    let record = sample_record("twice.txt");
    harness.add(&record).await;
    let sweeper = harness.sweeper(100, false);

    assert!(sweeper.purge(&record).await.unwrap());
    assert!(!sweeper.purge(&record).await.unwrap());
}

#[tokio::test]
async fn test_scheduler_runs_periodically() {
    let harness = Harness::new().await;
    let old = expired("scheduled.txt");
    harness.add(&old).await;

    let sweeper = Arc::new(harness.sweeper(100, false));
    let handle = sweeper.spawn_scheduler(std::time::Duration::from_millis(50));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if harness.store().find_by_id(old.id).await.unwrap().is_none() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("scheduled sweep did not run in time");
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    handle.abort();
}
