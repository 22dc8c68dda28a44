pub mod admission;
pub mod blob_store;
pub mod cache;
pub mod compression;
pub mod metadata_store;
pub mod pipeline;
pub mod retrieval;
pub mod sweeper;
pub mod upload_service;
