pub mod file;
pub mod id;
pub mod metadata;
pub mod reconcile;
pub mod stats;
pub mod sweeper;

pub use file::FileService;
pub use metadata::MetadataTable;
pub use reconcile::reconcile;
pub use stats::StatsService;
pub use sweeper::spawn_sweeper;
