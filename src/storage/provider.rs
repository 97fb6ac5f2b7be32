use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::models::StoredBlob;

/// Location and size of a blob written by [`StorageProvider::put`]
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// A blob opened for streaming
#[derive(Debug)]
pub struct OpenBlob {
    pub file: tokio::fs::File,
    pub size: u64,
}

/// Storage provider trait
///
/// Blobs are addressed by file id. The stored name may carry an extension,
/// so lookups match on the id rather than on an exact name.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stream `reader` into storage under `id`.
    /// Either the complete blob becomes visible or nothing does.
    async fn put(
        &self,
        id: &str,
        extension: Option<&str>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BlobInfo>;

    /// Locate the stored object for `id`
    async fn resolve(&self, id: &str) -> Result<PathBuf>;

    /// Open the stored object for `id` for reading
    async fn open(&self, id: &str) -> Result<OpenBlob>;

    /// Delete the stored object for `id`
    async fn delete(&self, id: &str) -> Result<()>;

    /// Enumerate every stored object
    async fn list_all(&self) -> Result<Vec<StoredBlob>>;

    /// Remove leftovers of abandoned uploads, returning how many were removed
    async fn purge_incomplete(&self) -> Result<usize> {
        Ok(0)
    }

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
