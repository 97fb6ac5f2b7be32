use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::AppError;
use crate::services::MetadataTable;
use crate::storage::StorageProvider;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub failed: usize,
    /// Upload reservations that never finished writing
    pub abandoned: usize,
}

/// Evict every file idle for at least `retention` as of `now`.
///
/// Each candidate is re-checked under its record lock, so a download that
/// got there first keeps the file. A blob that is already gone still has
/// its record removed. Other delete failures leave both blob and record in
/// place for the next sweep. Upload reservations older than `retention`
/// belong to uploads that were cancelled mid-write and are released.
pub async fn sweep(
    table: &MetadataTable,
    storage: &dyn StorageProvider,
    retention: Duration,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport {
        abandoned: table
            .release_stale(|record| record.is_expired(now, retention))
            .await,
        ..SweepReport::default()
    };
    if report.abandoned > 0 {
        tracing::warn!(count = report.abandoned, "Released abandoned upload reservations");
    }

    for candidate in table.snapshot().await {
        if !candidate.is_expired(now, retention) {
            continue;
        }
        let Some(guard) = table.lock(&candidate.id).await else {
            continue;
        };
        if !guard.record().is_expired(now, retention) {
            tracing::debug!(id = %candidate.id, "File downloaded during sweep, keeping");
            continue;
        }

        match storage.delete(&candidate.id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                tracing::warn!(id = %candidate.id, "Blob already gone, dropping metadata");
            }
            Err(e) => {
                tracing::warn!(id = %candidate.id, error = %e, "Failed to evict file");
                report.failed += 1;
                continue;
            }
        }

        let record = guard.remove().await;
        report.evicted += 1;
        tracing::info!(
            id = %record.id,
            name = %record.original_name,
            last_activity = %record.last_activity(),
            "Evicted idle file"
        );
    }

    report
}

/// Spawn the recurring eviction task. The first sweep runs one `interval`
/// after startup.
pub fn spawn_sweeper(
    table: Arc<MetadataTable>,
    storage: Arc<dyn StorageProvider>,
    retention: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweep(&table, storage.as_ref(), retention, Utc::now()).await;
            if report.evicted > 0 || report.failed > 0 || report.abandoned > 0 {
                tracing::info!(
                    evicted = report.evicted,
                    failed = report.failed,
                    abandoned = report.abandoned,
                    "Sweep finished"
                );
            } else {
                tracing::debug!("Sweep finished, nothing to evict");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{FileRecord, StoredBlob};
    use crate::services::FileService;
    use crate::storage::{BlobInfo, LocalStorage, OpenBlob};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::AsyncRead;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    async fn setup() -> (TempDir, Arc<MetadataTable>, Arc<LocalStorage>) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::open_dir(temp_dir.path()).await.unwrap();
        (temp_dir, Arc::new(MetadataTable::new()), Arc::new(storage))
    }

    async fn upload_at(
        table: &MetadataTable,
        storage: &dyn StorageProvider,
        name: &str,
        at: DateTime<Utc>,
    ) -> FileRecord {
        let mut reader: &[u8] = b"payload";
        FileService::upload_file(table, storage, name, &mut reader, at)
            .await
            .unwrap()
    }

    /// Local storage whose deletes fail for one id
    struct FailingDelete {
        inner: LocalStorage,
        fail_id: String,
    }

    #[async_trait]
    impl StorageProvider for FailingDelete {
        async fn put(
            &self,
            id: &str,
            extension: Option<&str>,
            reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<BlobInfo> {
            self.inner.put(id, extension, reader).await
        }

        async fn resolve(&self, id: &str) -> Result<PathBuf> {
            self.inner.resolve(id).await
        }

        async fn open(&self, id: &str) -> Result<OpenBlob> {
            self.inner.open(id).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            if id == self.fail_id {
                return Err(AppError::Delete(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.inner.delete(id).await
        }

        async fn list_all(&self) -> Result<Vec<StoredBlob>> {
            self.inner.list_all().await
        }

        fn storage_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_releases_abandoned_reservations() {
        let (_dir, table, storage) = setup().await;
        let now = Utc::now();

        let old = FileRecord::new("cancelled".to_string(), "a.bin".to_string(), now - chrono::Duration::days(31));
        let recent = FileRecord::new("writing".to_string(), "b.bin".to_string(), now);
        table.reserve(old).await;
        table.reserve(recent).await;

        let report = sweep(&table, storage.as_ref(), 30 * DAY, now).await;
        assert_eq!(report, SweepReport { evicted: 0, failed: 0, abandoned: 1 });
        assert!(!table.contains("cancelled").await);
        assert!(table.commit("writing").await);
    }

    #[tokio::test]
    async fn test_evicts_only_idle_files() {
        let (_dir, table, storage) = setup().await;
        let now = Utc::now();

        let stale = upload_at(&table, storage.as_ref(), "old.txt", now - chrono::Duration::days(31)).await;
        let fresh = upload_at(&table, storage.as_ref(), "new.txt", now - chrono::Duration::days(2)).await;
        let revived = upload_at(&table, storage.as_ref(), "revived.txt", now - chrono::Duration::days(90)).await;
        FileService::download_file(&table, storage.as_ref(), &revived.id, now - chrono::Duration::days(1))
            .await
            .unwrap();

        let report = sweep(&table, storage.as_ref(), 30 * DAY, now).await;
        assert_eq!(report, SweepReport { evicted: 1, failed: 0, abandoned: 0 });

        assert!(table.get(&stale.id).await.is_none());
        assert!(matches!(storage.resolve(&stale.id).await, Err(AppError::NotFound(_))));

        assert_eq!(table.get(&fresh.id).await.unwrap(), fresh);
        assert!(storage.resolve(&fresh.id).await.is_ok());
        assert!(storage.resolve(&revived.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_blob_still_drops_metadata() {
        let (_dir, table, storage) = setup().await;
        let now = Utc::now();
        let stale = upload_at(&table, storage.as_ref(), "old.txt", now - chrono::Duration::days(40)).await;
        storage.delete(&stale.id).await.unwrap();

        let report = sweep(&table, storage.as_ref(), 30 * DAY, now).await;
        assert_eq!(report.evicted, 1);
        assert!(table.get(&stale.id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let table = MetadataTable::new();
        let now = Utc::now();
        let setup_storage = LocalStorage::open_dir(temp_dir.path()).await.unwrap();
        let stuck = upload_at(&table, &setup_storage, "stuck.txt", now - chrono::Duration::days(40)).await;
        let other = upload_at(&table, &setup_storage, "other.txt", now - chrono::Duration::days(40)).await;

        let storage = FailingDelete {
            inner: setup_storage,
            fail_id: stuck.id.clone(),
        };
        let report = sweep(&table, &storage, 30 * DAY, now).await;
        assert_eq!(report, SweepReport { evicted: 1, failed: 1, abandoned: 0 });

        // both halves of the failed eviction survive together
        assert!(table.get(&stuck.id).await.is_some());
        assert!(storage.resolve(&stuck.id).await.is_ok());
        assert!(table.get(&other.id).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_download_racing_eviction_is_all_or_nothing() {
        let (_dir, table, storage) = setup().await;

        for _ in 0..50 {
            let now = Utc::now();
            let record = upload_at(&table, storage.as_ref(), "race.txt", now - chrono::Duration::days(45)).await;

            let download = {
                let (table, storage, id) = (table.clone(), storage.clone(), record.id.clone());
                tokio::spawn(async move {
                    FileService::download_file(&table, storage.as_ref(), &id, now).await
                })
            };
            let sweeper = {
                let (table, storage) = (table.clone(), storage.clone());
                tokio::spawn(async move { sweep(&table, storage.as_ref(), 30 * DAY, now).await })
            };
            let downloaded = download.await.unwrap();
            sweeper.await.unwrap();

            let has_record = table.get(&record.id).await.is_some();
            let has_blob = storage.resolve(&record.id).await.is_ok();
            match downloaded {
                Ok(download) => {
                    assert_eq!(download.record.download_count, 1);
                    assert!(has_record && has_blob);
                }
                Err(AppError::NotFound(_)) => assert!(!has_record && !has_blob),
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_on_interval() {
        let (_dir, table, storage) = setup().await;
        let stale = upload_at(
            &table,
            storage.as_ref(),
            "old.txt",
            Utc::now() - chrono::Duration::days(40),
        )
        .await;

        let handle = spawn_sweeper(
            table.clone(),
            storage.clone(),
            30 * DAY,
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(table.get(&stale.id).await.is_none());
    }
}
