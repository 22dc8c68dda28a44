pub mod chunk_uploads;
pub mod file_access_logs;
pub mod files;
pub mod processing_jobs;

pub mod prelude {
    pub use super::chunk_uploads::Entity as ChunkUploads;
    pub use super::file_access_logs::Entity as FileAccessLogs;
    pub use super::files::Entity as Files;
    pub use super::processing_jobs::Entity as ProcessingJobs;
}
