use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::FileRecord;
use crate::services::MetadataTable;

const MAX_ATTEMPTS: usize = 8;

/// Random 128-bit file id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Draw ids until one can be reserved in `table`, and return the
/// reserved (still unpublished) record
pub async fn reserve_id(
    table: &MetadataTable,
    original_name: &str,
    now: DateTime<Utc>,
) -> Result<FileRecord> {
    for _ in 0..MAX_ATTEMPTS {
        let record = FileRecord::new(new_id(), original_name.to_string(), now);
        if table.reserve(record.clone()).await {
            return Ok(record);
        }
        tracing::warn!(id = %record.id, "Generated file id already in use, retrying");
    }
    Err(AppError::Conflict("Could not allocate a file id".to_string()))
}
