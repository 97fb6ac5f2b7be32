use crate::models::FileRecord;
use crate::services::MetadataTable;

/// Read-only view over the metadata table
pub struct StatsService;

impl StatsService {
    /// Every tracked file, oldest upload first
    pub async fn report(table: &MetadataTable) -> Vec<FileRecord> {
        let mut records = table.snapshot().await;
        records.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then_with(|| a.id.cmp(&b.id)));
        records
    }
}
