pub mod file;
pub mod stats;
