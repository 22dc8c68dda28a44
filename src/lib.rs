pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::services::admission::AdmissionController;
use crate::services::blob_store::BlobStore;
use crate::services::cache::EphemeralCache;
use crate::services::compression::CompressionEngine;
use crate::services::metadata_store::MetadataStore;
use crate::services::pipeline::ProcessingPipeline;
use crate::services::retrieval::RetrievalService;
use crate::services::sweeper::ExpirySweeper;
use crate::services::upload_service::UploadCoordinator;
use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::watch;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_file,
        api::handlers::chunk::initiate_upload,
        api::handlers::chunk::upload_chunk,
        api::handlers::chunk::complete_upload,
        api::handlers::chunk::upload_status,
        api::handlers::file::download_file,
        api::handlers::file::file_status,
        api::handlers::file::delete_file,
        api::handlers::file::get_metadata,
        api::handlers::preview::preview_file,
        api::handlers::preview::stream_file,
        api::handlers::archive::browse_zip,
        api::handlers::archive::extract_zip_entry,
        api::handlers::admin::admin_auth,
        api::handlers::admin::update_expiration,
        api::handlers::admin::admin_delete_file,
        api::handlers::admin::admin_list_files,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::types::FileMetadataResponse,
            api::handlers::types::ZipEntry,
            api::handlers::chunk::InitiateUploadRequest,
            api::handlers::admin::AdminRequest,
            api::handlers::admin::UpdateExpirationRequest,
        )
    ),
    tags(
        (name = "files", description = "Upload, retrieval and deletion"),
        (name = "chunks", description = "Chunked upload sessions"),
        (name = "admin", description = "Administrative surface"),
        (name = "system", description = "Health and status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
    pub cache: Arc<EphemeralCache>,
    pub compressor: Arc<CompressionEngine>,
    pub blobs: Arc<BlobStore>,
    pub metadata: Arc<MetadataStore>,
    pub retrieval: Arc<RetrievalService>,
    pub pipeline: Arc<ProcessingPipeline>,
    pub uploads: Arc<UploadCoordinator>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    /// Wire up every service against the shared config and database. Also
    /// prepares the scratch and blob directories.
    pub async fn new(config: Config, db: DatabaseConnection) -> anyhow::Result<Self> {
        let cache = Arc::new(EphemeralCache::new());
        let compressor = Arc::new(CompressionEngine::new());
        let blobs = Arc::new(BlobStore::new(&config.temp_dir));
        blobs.init().await?;

        let metadata = Arc::new(MetadataStore::new(db.clone()));
        let retrieval = Arc::new(RetrievalService::new(
            blobs.clone(),
            compressor.clone(),
            cache.clone(),
        ));
        let pipeline = Arc::new(ProcessingPipeline::new(
            cache.clone(),
            metadata.clone(),
            blobs.clone(),
            compressor.clone(),
            config.clone(),
        ));
        let uploads = Arc::new(UploadCoordinator::new(
            cache.clone(),
            metadata.clone(),
            pipeline.clone(),
            config.clone(),
        ));
        uploads.ensure_scratch().await.map_err(|e| {
            anyhow::anyhow!("failed to prepare scratch directory: {:?}", e)
        })?;

        let admission = Arc::new(AdmissionController::new(
            config.max_concurrent_uploads,
            config.max_concurrent_downloads,
        ));

        Ok(Self {
            db,
            config,
            cache,
            compressor,
            blobs,
            metadata,
            retrieval,
            pipeline,
            uploads,
            admission,
        })
    }

    /// Launch the expiry sweeper; it stops when `shutdown` flips.
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let sweeper = ExpirySweeper::new(
            self.cache.clone(),
            self.metadata.clone(),
            self.blobs.clone(),
            self.uploads.clone(),
            self.config.clone(),
            shutdown,
        );
        tokio::spawn(sweeper.run())
    }
}

pub fn create_app(state: AppState) -> Router {
    let upload_body_limit = (state.config.chunk_threshold as usize).saturating_add(10 * 1024 * 1024);
    let chunk_body_limit = (state.config.chunk_size as usize).saturating_add(10 * 1024 * 1024);

    // Everything except the media paths runs under the request deadline;
    // streams and previews only end when the client does.
    let api_routes = Router::new()
        .route(
            "/api/upload",
            post(api::handlers::upload::upload_file)
                .layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route(
            "/api/chunk/initiate",
            post(api::handlers::chunk::initiate_upload),
        )
        .route(
            "/api/chunk/:upload_id/complete",
            post(api::handlers::chunk::complete_upload),
        )
        .route(
            "/api/chunk/:upload_id/status",
            get(api::handlers::chunk::upload_status),
        )
        .route(
            "/api/chunk/:upload_id/:chunk_index",
            post(api::handlers::chunk::upload_chunk)
                .layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .route(
            "/api/file/:id",
            get(api::handlers::file::download_file).delete(api::handlers::file::delete_file),
        )
        .route("/api/file/:id/status", get(api::handlers::file::file_status))
        .route("/api/metadata/:id", get(api::handlers::file::get_metadata))
        .route("/api/zip/:id", get(api::handlers::archive::browse_zip))
        .route(
            "/api/zip/:id/extract",
            get(api::handlers::archive::extract_zip_entry),
        )
        .route("/api/admin/auth", post(api::handlers::admin::admin_auth))
        .route(
            "/api/admin/file/:id/expires",
            put(api::handlers::admin::update_expiration),
        )
        .route(
            "/api/admin/file/:id",
            delete(api::handlers::admin::admin_delete_file),
        )
        .route("/api/admin/files", post(api::handlers::admin::admin_list_files))
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::timeout::timeout_middleware,
        ));

    let streaming_routes = Router::new()
        .route("/api/preview/:id", get(api::handlers::preview::preview_file))
        .route("/api/stream/:id", get(api::handlers::preview::stream_file));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .merge(streaming_routes)
        .route("/health", get(api::handlers::health::health_check))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
