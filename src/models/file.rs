use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Metadata tracked for every stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    pub upload_time: DateTime<Utc>,
    pub last_download_time: Option<DateTime<Utc>>,
    pub download_count: u64,
}

impl FileRecord {
    /// Record for a freshly uploaded file
    pub fn new(id: String, original_name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            original_name,
            upload_time: now,
            last_download_time: None,
            download_count: 0,
        }
    }

    /// Record synthesized for a blob found on disk without metadata.
    /// Falls back to `now` when the filesystem has no usable timestamp.
    pub fn recovered(blob: &StoredBlob, now: DateTime<Utc>) -> Self {
        Self {
            id: blob.id.clone(),
            original_name: blob.file_name.clone(),
            upload_time: blob.modified.unwrap_or(now),
            last_download_time: None,
            download_count: 0,
        }
    }

    /// Last download, or the upload time if never downloaded
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_download_time.unwrap_or(self.upload_time)
    }

    /// Whether the file has been idle for at least `retention`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match (now - self.last_activity()).to_std() {
            Ok(idle) => idle >= retention,
            // last activity lies in the future
            Err(_) => false,
        }
    }

    pub fn record_download(&mut self, now: DateTime<Utc>) {
        self.last_download_time = Some(now);
        self.download_count += 1;
    }
}

/// A blob as found in the storage directory
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub id: String,
    pub file_name: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub download_url: String,
}
