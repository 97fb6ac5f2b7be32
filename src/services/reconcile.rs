use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::FileRecord;
use crate::services::MetadataTable;
use crate::storage::StorageProvider;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blobs found in storage
    pub scanned: usize,
    /// Records synthesized for blobs that had none
    pub restored: usize,
    /// Abandoned partial uploads removed
    pub purged: usize,
}

/// Seed the metadata table from what is actually in storage.
///
/// Runs before the server accepts requests. Existing records are never
/// overwritten, so a second pass over an unchanged store is a no-op.
/// Failing to enumerate storage is fatal.
pub async fn reconcile(
    table: &MetadataTable,
    storage: &dyn StorageProvider,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let purged = storage.purge_incomplete().await.map_err(into_fatal)?;
    let blobs = storage.list_all().await.map_err(into_fatal)?;

    let mut report = ReconcileReport {
        scanned: blobs.len(),
        restored: 0,
        purged,
    };
    for blob in &blobs {
        if table.contains(&blob.id).await {
            continue;
        }
        if table.insert(FileRecord::recovered(blob, now)).await {
            report.restored += 1;
        } else {
            tracing::warn!(id = %blob.id, file = %blob.file_name, "Duplicate file id in storage, skipping");
        }
    }

    tracing::info!(
        scanned = report.scanned,
        restored = report.restored,
        purged = report.purged,
        "Reconciled file metadata with storage"
    );
    Ok(report)
}

fn into_fatal(err: AppError) -> AppError {
    match err {
        AppError::Read(e) | AppError::Io(e) => AppError::Reconciliation(e),
        other => other,
    }
}
