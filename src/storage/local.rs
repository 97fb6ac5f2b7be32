use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::StoredBlob;
use crate::storage::{BlobInfo, OpenBlob, StorageProvider};

const PARTIAL_PREFIX: &str = ".upload-";
const PARTIAL_SUFFIX: &str = ".part";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Local file system storage provider
///
/// One flat directory, one file per blob, named `<id>` or `<id>.<ext>`.
/// Hidden entries belong to the store itself (in-flight uploads) and are
/// never reported as blobs.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the storage directory if needed and return a provider over it
    pub async fn open_dir(base_path: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self::new(base_path);
        fs::create_dir_all(&storage.base_path).await?;
        tracing::info!(path = %storage.base_path.display(), "Initialized local storage");
        Ok(storage)
    }

    fn blob_name(id: &str, extension: Option<&str>) -> String {
        match extension {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        }
    }

    fn is_partial(file_name: &str) -> bool {
        file_name.starts_with(PARTIAL_PREFIX) && file_name.ends_with(PARTIAL_SUFFIX)
    }

    async fn is_regular_file(entry: &fs::DirEntry) -> bool {
        entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false)
    }
}

/// File id encoded in a stored name: the name without its last extension
pub fn blob_id(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    let id = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    (!id.is_empty()).then_some(id)
}

/// Removes an in-flight upload file unless disarmed.
/// Failed writes discard it explicitly; the drop path covers an upload
/// future that is dropped mid-write.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn discard(mut self) {
        self.armed = false;
        log_partial_removal(&self.path, fs::remove_file(&self.path).await);
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        // keep the unlink off the async worker when a runtime is around
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _ = handle.spawn_blocking(move || {
                    log_partial_removal(&path, std::fs::remove_file(&path));
                });
            }
            Err(_) => log_partial_removal(&path, std::fs::remove_file(&path)),
        }
    }
}

fn log_partial_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!("Removed incomplete upload {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove incomplete upload {:?}: {}", path, e),
    }
}

async fn write_partial(
    path: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<u64> {
    let mut file = fs::File::create(path).await.map_err(AppError::Write)?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| AppError::BadRequest(format!("Upload interrupted: {}", e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await.map_err(AppError::Write)?;
        size += n as u64;
    }
    file.flush().await.map_err(AppError::Write)?;
    file.sync_all().await.map_err(AppError::Write)?;
    Ok(size)
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(
        &self,
        id: &str,
        extension: Option<&str>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BlobInfo> {
        let temp_path = self.base_path.join(format!(
            "{}{}{}",
            PARTIAL_PREFIX,
            Uuid::new_v4(),
            PARTIAL_SUFFIX
        ));
        let partial = PartialFile::new(temp_path.clone());

        let size = match write_partial(&temp_path, reader).await {
            Ok(size) => size,
            Err(e) => {
                partial.discard().await;
                return Err(e);
            }
        };

        let full_path = self.base_path.join(Self::blob_name(id, extension));
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            partial.discard().await;
            return Err(AppError::Write(e));
        }
        partial.disarm();

        tracing::debug!("Saved file to {:?}", full_path);
        Ok(BlobInfo {
            path: full_path,
            size,
        })
    }

    async fn resolve(&self, id: &str) -> Result<PathBuf> {
        let mut entries = fs::read_dir(&self.base_path).await.map_err(AppError::Read)?;
        while let Some(entry) = entries.next_entry().await.map_err(AppError::Read)? {
            let name = entry.file_name();
            let matches = name.to_str().and_then(blob_id) == Some(id);
            if matches && Self::is_regular_file(&entry).await {
                return Ok(entry.path());
            }
        }
        Err(AppError::NotFound("File not found".to_string()))
    }

    async fn open(&self, id: &str) -> Result<OpenBlob> {
        let path = self.resolve(id).await?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::NotFound("File not found".to_string())
            } else {
                AppError::Read(e)
            }
        })?;
        let size = file.metadata().await.map_err(AppError::Read)?.len();
        Ok(OpenBlob { file, size })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.resolve(id).await?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::NotFound("File not found".to_string())
            } else {
                AppError::Delete(e)
            }
        })?;
        tracing::debug!("Deleted file {:?}", path);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredBlob>> {
        let mut blobs = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await.map_err(AppError::Read)?;
        while let Some(entry) = entries.next_entry().await.map_err(AppError::Read)? {
            let Ok(file_name) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            let Some(id) = blob_id(&file_name).map(str::to_string) else {
                continue;
            };
            if !Self::is_regular_file(&entry).await {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            blobs.push(StoredBlob {
                id,
                file_name,
                modified,
            });
        }
        Ok(blobs)
    }

    async fn purge_incomplete(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.base_path).await.map_err(AppError::Read)?;
        while let Some(entry) = entries.next_entry().await.map_err(AppError::Read)? {
            let is_partial = entry.file_name().to_str().is_some_and(Self::is_partial);
            if !is_partial {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", entry.path(), e),
            }
        }
        Ok(removed)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
