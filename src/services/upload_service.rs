use crate::api::error::AppError;
use crate::entities::chunk_uploads;
use crate::services::cache::{keys, EphemeralCache};
use crate::services::metadata_store::MetadataStore;
use crate::services::pipeline::{ProcessingJob, ProcessingPipeline, ProcessingStatus};
use crate::config::Config;
use crate::utils::session_locks::SessionLocks;
use crate::utils::token;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Free-space head-room required on top of any write.
pub const DISK_HEADROOM: u64 = 1024 * 1024 * 1024;
/// Scratch files older than this are removed by the aggressive cleanup.
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(3600);
/// Sessions idle longer than this are destroyed by the aggressive cleanup.
const STALE_SESSION_IDLE_SECS: i64 = 600;

/// In-flight chunked upload. Lives in the ephemeral cache under
/// `chunk_upload:<id>`; the scratch directory `<temp>/<upload_id>` is owned
/// exclusively by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: usize,
    pub received_chunks: Vec<bool>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_password: Option<String>,
}

impl UploadSession {
    pub fn received_count(&self) -> usize {
        self.received_chunks.iter().filter(|b| **b).count()
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    pub fn first_missing(&self) -> Option<usize> {
        self.received_chunks.iter().position(|b| !*b)
    }
}

#[derive(Debug)]
pub struct InitiateRequest {
    pub filename: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub file_hash: Option<String>,
    pub download_password: Option<String>,
}

#[derive(Debug)]
pub struct InitiateReceipt {
    pub upload_id: String,
    pub total_chunks: usize,
    pub chunk_size: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ChunkReceipt {
    pub chunk_index: usize,
    pub received_chunks: usize,
    pub total_chunks: usize,
    pub complete: bool,
    pub already_received: bool,
}

#[derive(Debug)]
pub enum CompleteOutcome {
    Accepted { job_id: String, file_id: String },
    Incomplete { missing_chunk: usize },
}

/// Chunked-upload state machine: initiate, receive chunk, complete.
pub struct UploadCoordinator {
    cache: Arc<EphemeralCache>,
    metadata: Arc<MetadataStore>,
    pipeline: Arc<ProcessingPipeline>,
    locks: SessionLocks,
    config: Config,
}

impl UploadCoordinator {
    pub fn new(
        cache: Arc<EphemeralCache>,
        metadata: Arc<MetadataStore>,
        pipeline: Arc<ProcessingPipeline>,
        config: Config,
    ) -> Self {
        Self {
            cache,
            metadata,
            pipeline,
            locks: SessionLocks::new(),
            config,
        }
    }

    /// Create the scratch root (and the blob subdirectory) at startup.
    pub async fn ensure_scratch(&self) -> Result<(), AppError> {
        let temp_dir = Path::new(&self.config.temp_dir);
        fs::create_dir_all(temp_dir).await?;
        fs::create_dir_all(temp_dir.join("files")).await?;
        Ok(())
    }

    pub async fn initiate(&self, req: InitiateRequest) -> Result<InitiateReceipt, AppError> {
        if req.total_size <= 0 || req.chunk_size <= 0 {
            return Err(AppError::BadRequest(
                "total_size and chunk_size must be positive".to_string(),
            ));
        }
        if req.total_size > self.config.max_file_size {
            return Err(AppError::PayloadTooLarge(format!(
                "File too large, max {} bytes",
                self.config.max_file_size
            )));
        }
        if req.chunk_size > self.config.chunk_size {
            return Err(AppError::BadRequest(format!(
                "Chunk size too large, max {} bytes",
                self.config.chunk_size
            )));
        }

        let total_chunks =
            ((req.total_size + req.chunk_size - 1) / req.chunk_size) as usize;
        if total_chunks > self.config.max_chunks_per_file {
            return Err(AppError::BadRequest(format!(
                "Too many chunks, max {}",
                self.config.max_chunks_per_file
            )));
        }

        let upload_id = token::generate_id();
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.config.chunk_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));

        let session = UploadSession {
            upload_id: upload_id.clone(),
            filename: req.filename.clone(),
            total_size: req.total_size,
            chunk_size: req.chunk_size,
            total_chunks,
            received_chunks: vec![false; total_chunks],
            created_at: now,
            last_activity: now,
            expires_at,
            file_hash: req.file_hash.clone(),
            download_password: req.download_password.clone(),
        };

        fs::create_dir_all(self.scratch_dir(&upload_id)).await?;

        self.store_session(&session)?;

        let row = chunk_uploads::ActiveModel {
            upload_id: Set(upload_id.clone()),
            filename: Set(req.filename),
            total_size: Set(req.total_size),
            total_chunks: Set(total_chunks as i32),
            chunk_size: Set(req.chunk_size),
            file_hash: Set(req.file_hash),
            has_download_password: Set(req.download_password.is_some()),
            status: Set("pending".to_string()),
            created_at: Set(now.into()),
            expires_at: Set(expires_at.into()),
        };
        self.metadata.register_session(row).await?;

        tracing::info!(
            "📦 Upload session {} initiated: {} chunks of {} bytes",
            upload_id,
            total_chunks,
            session.chunk_size
        );

        Ok(InitiateReceipt {
            upload_id,
            total_chunks,
            chunk_size: session.chunk_size,
            expires_at,
        })
    }

    /// Receive one chunk. Idempotent: a re-posted chunk acknowledges without
    /// rewriting. The chunk file is fsynced before its bit flips, so a bit
    /// set in the mask always refers to durable bytes.
    pub async fn put_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        bytes: &[u8],
    ) -> Result<ChunkReceipt, AppError> {
        // Validate under the session lock, but write the chunk file outside
        // it: files for different indices are disjoint.
        {
            let _guard = self.locks.lock(upload_id).await;
            let session = self.load_session(upload_id)?;

            if chunk_index >= session.total_chunks {
                return Err(AppError::BadRequest("Invalid chunk index".to_string()));
            }
            if session.received_chunks[chunk_index] {
                return Ok(ChunkReceipt {
                    chunk_index,
                    received_chunks: session.received_count(),
                    total_chunks: session.total_chunks,
                    complete: session.is_complete(),
                    already_received: true,
                });
            }
        }

        self.ensure_disk_space(bytes.len() as u64).await?;

        let chunk_path = self
            .scratch_dir(upload_id)
            .join(format!("chunk_{}", chunk_index));
        let mut file = fs::File::create(&chunk_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        let _guard = self.locks.lock(upload_id).await;
        let mut session = self.load_session(upload_id)?;
        session.received_chunks[chunk_index] = true;
        session.last_activity = Utc::now();
        self.store_session(&session)?;

        Ok(ChunkReceipt {
            chunk_index,
            received_chunks: session.received_count(),
            total_chunks: session.total_chunks,
            complete: session.is_complete(),
            already_received: false,
        })
    }

    /// Finalize a session: verify the mask, create the pending job, publish
    /// the processing marker and hand off to the pipeline.
    pub async fn complete(&self, upload_id: &str) -> Result<CompleteOutcome, AppError> {
        let _guard = self.locks.lock(upload_id).await;
        let session = self.load_session(upload_id)?;

        if let Some(missing_chunk) = session.first_missing() {
            return Ok(CompleteOutcome::Incomplete { missing_chunk });
        }

        let job = ProcessingJob::new(upload_id);
        let job_id = job.job_id.clone();
        let file_id = job.file_id.clone();

        self.cache.set(
            &keys::processing_job(&job_id),
            &job,
            Duration::from_secs(24 * 3600),
        )?;
        self.cache.set(
            &keys::processing(&file_id),
            &ProcessingStatus {
                status: "processing".to_string(),
                filename: Some(session.filename.clone()),
                error: None,
                job_id: Some(job_id.clone()),
            },
            ProcessingPipeline::processing_status_ttl(),
        )?;

        self.pipeline.clone().spawn_job(job, session);

        tracing::info!(
            "🚚 Upload {} complete, job {} queued for file {}",
            upload_id,
            job_id,
            file_id
        );

        Ok(CompleteOutcome::Accepted { job_id, file_id })
    }

    pub fn status(&self, upload_id: &str) -> Result<UploadSession, AppError> {
        self.load_session(upload_id)
    }

    /// Destroy sessions idle past the configured timeout, and retire their
    /// lock slots. Called by the sweeper's cache loop.
    pub async fn cleanup_idle_sessions(&self) -> usize {
        let idle_window = chrono::Duration::from_std(self.config.chunk_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let removed = self.cleanup_sessions_older_than(Utc::now() - idle_window).await;

        let retired = self.locks.retire_idle(idle_window);
        if retired > 0 {
            tracing::debug!("Retired {} idle session locks", retired);
        }

        removed
    }

    /// Emergency space recovery: drop stale scratch files and destroy
    /// sessions idle for more than ten minutes.
    pub async fn aggressive_cleanup(&self) {
        tracing::warn!("🧹 Low disk space: running aggressive scratch cleanup");

        let temp_dir = PathBuf::from(&self.config.temp_dir);
        let blob_dir = temp_dir.join("files");
        let cutoff = std::time::SystemTime::now() - STALE_SCRATCH_AGE;

        let _ = tokio::task::spawn_blocking(move || {
            remove_stale_files(&temp_dir, &blob_dir, cutoff);
        })
        .await;

        self.cleanup_sessions_older_than(
            Utc::now() - chrono::Duration::seconds(STALE_SESSION_IDLE_SECS),
        )
        .await;
    }

    async fn cleanup_sessions_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for key in self.cache.list_prefix(keys::CHUNK_UPLOAD_PREFIX) {
            if let Some(session) = self.cache.get::<UploadSession>(&key) {
                if session.last_activity < cutoff {
                    tracing::info!("Expiring idle upload session {}", session.upload_id);
                    self.destroy_session(&session.upload_id).await;
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove a session's cache entry, registration row and scratch dir.
    pub async fn destroy_session(&self, upload_id: &str) {
        self.cache.del(&keys::chunk_upload(upload_id));
        if let Err(e) = self.metadata.remove_session(upload_id).await {
            tracing::warn!("Failed to remove session row {}: {}", upload_id, e);
        }
        if let Err(e) = fs::remove_dir_all(self.scratch_dir(upload_id)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch dir for {}: {}", upload_id, e);
            }
        }
    }

    fn scratch_dir(&self, upload_id: &str) -> PathBuf {
        Path::new(&self.config.temp_dir).join(upload_id)
    }

    fn load_session(&self, upload_id: &str) -> Result<UploadSession, AppError> {
        let session: UploadSession = self
            .cache
            .get(&keys::chunk_upload(upload_id))
            .ok_or_else(|| AppError::NotFound("Upload session not found".to_string()))?;
        if session.expires_at <= Utc::now() {
            return Err(AppError::NotFound("Upload session not found".to_string()));
        }
        Ok(session)
    }

    fn store_session(&self, session: &UploadSession) -> Result<(), AppError> {
        self.cache
            .set(
                &keys::chunk_upload(&session.upload_id),
                session,
                self.config.chunk_timeout,
            )
            .map_err(|e| AppError::Internal(format!("failed to store session: {}", e)))?;
        Ok(())
    }

    /// Guard a write of `required` bytes; attempts an aggressive cleanup
    /// before giving up.
    async fn ensure_disk_space(&self, required: u64) -> Result<(), AppError> {
        let temp_dir = PathBuf::from(&self.config.temp_dir);

        let Some(available) = available_disk_space(&temp_dir).await else {
            return Ok(());
        };
        let min_required = required + DISK_HEADROOM;
        if available >= min_required {
            return Ok(());
        }

        self.aggressive_cleanup().await;

        let available = available_disk_space(&temp_dir).await.unwrap_or(u64::MAX);
        if available < min_required {
            return Err(AppError::InsufficientSpace(format!(
                "available {} bytes, required {}",
                available, min_required
            )));
        }
        Ok(())
    }
}

/// Bytes available on the filesystem holding `path`. None when the disk
/// cannot be resolved (containers with exotic mounts); callers treat that
/// as unlimited rather than failing uploads.
pub async fn available_disk_space(path: &Path) -> Option<u64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let resolved = path.canonicalize().unwrap_or(path);
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter(|disk| resolved.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    })
    .await
    .ok()
    .flatten()
}

/// Remove regular files under `root` older than `cutoff`, leaving the blob
/// directory untouched.
fn remove_stale_files(root: &Path, blob_dir: &Path, cutoff: std::time::SystemTime) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path == *blob_dir {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        if metadata.is_dir() {
            remove_stale_files(&path, blob_dir, cutoff);
            continue;
        }

        if metadata
            .modified()
            .map(|modified| modified < cutoff)
            .unwrap_or(false)
        {
            tracing::info!("Removing stale scratch file {}", path.display());
            let _ = std::fs::remove_file(&path);
        }
    }
}
