use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::io::AsyncRead;

use crate::error::{AppError, Result};
use crate::models::FileRecord;
use crate::services::{id, MetadataTable};
use crate::storage::StorageProvider;

const MAX_EXTENSION_LEN: usize = 16;

/// A download ready to be streamed to the client
#[derive(Debug)]
pub struct FileDownload {
    pub record: FileRecord,
    pub file: tokio::fs::File,
    pub size: u64,
}

/// File service
pub struct FileService;

impl FileService {
    /// Store an uploaded stream and register its metadata.
    ///
    /// The id is reserved before any byte is written, so no other upload
    /// can place a blob under it. The record becomes visible only once the
    /// blob is completely written; a failed write gives the id back.
    pub async fn upload_file(
        table: &MetadataTable,
        storage: &dyn StorageProvider,
        original_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        let original_name = display_name(original_name)
            .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

        let record = id::reserve_id(table, &original_name, now).await?;
        let extension = extension_hint(&original_name);
        let blob = match storage.put(&record.id, extension.as_deref(), reader).await {
            Ok(blob) => blob,
            Err(e) => {
                table.release(&record.id).await;
                return Err(e);
            }
        };

        if !table.commit(&record.id).await {
            // reservation dropped by the sweeper; the blob is adopted on restart
            tracing::error!(id = %record.id, "Upload reservation expired before the write finished");
            return Err(AppError::Internal("Upload took too long".to_string()));
        }

        tracing::info!(
            id = %record.id,
            name = %record.original_name,
            size = blob.size,
            path = %blob.path.display(),
            "File uploaded"
        );
        Ok(record)
    }

    /// Open a file for download and count the download.
    ///
    /// The stats change goes through the record guard rather than
    /// `MetadataTable::update`, because opening the blob has to happen under
    /// the same lock. Runs under the record lock, so an eviction of the same id either
    /// happens entirely before (NotFound) or sees the refreshed timestamp.
    /// A failed lookup never touches the stats.
    pub async fn download_file(
        table: &MetadataTable,
        storage: &dyn StorageProvider,
        file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FileDownload> {
        let mut guard = table
            .lock(file_id)
            .await
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        let blob = match storage.open(file_id).await {
            Ok(blob) => blob,
            Err(AppError::NotFound(msg)) => {
                tracing::warn!(id = %file_id, "Metadata present but blob missing");
                return Err(AppError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };

        let record = guard.record_mut();
        record.record_download(now);
        let record = record.clone();
        drop(guard);

        tracing::debug!(id = %file_id, count = record.download_count, "File downloaded");
        Ok(FileDownload {
            record,
            file: blob.file,
            size: blob.size,
        })
    }
}

/// Last path component of a client-supplied file name
pub fn display_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Extension kept on the stored blob, if it is short and plain
pub fn extension_hint(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let plain = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plain.then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use chrono::Duration;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::io::StreamReader;

    async fn setup() -> (TempDir, Arc<MetadataTable>, Arc<LocalStorage>) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::open_dir(temp_dir.path()).await.unwrap();
        (temp_dir, Arc::new(MetadataTable::new()), Arc::new(storage))
    }

    async fn read_all(download: FileDownload) -> Vec<u8> {
        let mut file = download.file;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        contents
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(display_name("C:\\Users\\me\\report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(display_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(display_name("  "), None);
        assert_eq!(display_name("dir/"), None);
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(extension_hint("report.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_hint("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_hint("README"), None);
        assert_eq!(extension_hint("weird.p df"), None);
        assert_eq!(extension_hint("x.aaaaaaaaaaaaaaaaaaaa"), None);
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let (_dir, table, storage) = setup().await;
        let bytes = b"%PDF-1.4 quarterly numbers".to_vec();
        let now = Utc::now();

        let mut reader: &[u8] = &bytes;
        let record = FileService::upload_file(&table, storage.as_ref(), "report.pdf", &mut reader, now)
            .await
            .unwrap();
        assert_eq!(record.upload_time, now);
        assert_eq!(record.download_count, 0);

        let download = FileService::download_file(&table, storage.as_ref(), &record.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(download.record.original_name, "report.pdf");
        assert_eq!(download.size, bytes.len() as u64);
        assert_eq!(read_all(download).await, bytes);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_distinct_ids() {
        let (_dir, table, storage) = setup().await;

        let mut handles = Vec::new();
        for i in 0..32 {
            let table = table.clone();
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let body = format!("file {}", i);
                let mut reader = body.as_bytes();
                FileService::upload_file(&table, storage.as_ref(), "same.txt", &mut reader, Utc::now())
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(table.len().await, 32);
        assert_eq!(storage.list_all().await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_download_stats_track_every_download() {
        let (_dir, table, storage) = setup().await;
        let mut reader: &[u8] = b"data";
        let start = Utc::now();
        let record = FileService::upload_file(&table, storage.as_ref(), "a.bin", &mut reader, start)
            .await
            .unwrap();

        for k in 1..=5 {
            let at = start + Duration::minutes(k);
            let download = FileService::download_file(&table, storage.as_ref(), &record.id, at)
                .await
                .unwrap();
            assert_eq!(download.record.download_count, k as u64);
        }

        let stored = table.get(&record.id).await.unwrap();
        assert_eq!(stored.download_count, 5);
        assert_eq!(stored.last_download_time, Some(start + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (_dir, table, storage) = setup().await;
        let result = FileService::download_file(&table, storage.as_ref(), "nope", Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_blob_does_not_count_download() {
        let (_dir, table, storage) = setup().await;
        let mut reader: &[u8] = b"data";
        let record = FileService::upload_file(&table, storage.as_ref(), "a.txt", &mut reader, Utc::now())
            .await
            .unwrap();
        storage.delete(&record.id).await.unwrap();

        let result = FileService::download_file(&table, storage.as_ref(), &record.id, Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let stored = table.get(&record.id).await.unwrap();
        assert_eq!(stored.download_count, 0);
        assert!(stored.last_download_time.is_none());
    }

    #[tokio::test]
    async fn test_upload_without_name_is_rejected() {
        let (_dir, table, storage) = setup().await;
        let mut reader: &[u8] = b"data";
        let result = FileService::upload_file(&table, storage.as_ref(), "", &mut reader, Utc::now()).await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(storage.list_all().await.unwrap().is_empty());
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_upload_in_progress_is_not_visible() {
        let (_dir, table, storage) = setup().await;
        let (mut client, mut body) = tokio::io::duplex(64);

        let upload = {
            let table = table.clone();
            let storage = storage.clone();
            tokio::spawn(async move {
                FileService::upload_file(&table, storage.as_ref(), "big.bin", &mut body, Utc::now())
                    .await
            })
        };

        client.write_all(b"first half ").await.unwrap();
        while table.len().await == 0 {
            tokio::task::yield_now().await;
        }
        assert!(table.snapshot().await.is_empty());

        client.write_all(b"second half").await.unwrap();
        drop(client);
        let record = upload.await.unwrap().unwrap();

        let download = FileService::download_file(&table, storage.as_ref(), &record.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(read_all(download).await, b"first half second half");
        assert_eq!(table.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_gives_back_its_id() {
        let (_dir, table, storage) = setup().await;
        let chunks: Vec<io::Result<&[u8]>> = vec![
            Ok(&b"partial"[..]),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut reader = StreamReader::new(futures::stream::iter(chunks));

        let result =
            FileService::upload_file(&table, storage.as_ref(), "a.bin", &mut reader, Utc::now()).await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(table.len().await, 0);
        assert!(storage.list_all().await.unwrap().is_empty());
    }
}
