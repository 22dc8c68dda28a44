use crate::config::Config;
use crate::entities::{files, processing_jobs};
use crate::services::blob_store::{
    BlobStore, StoredBlob, STORAGE_KIND_EXTERNAL, STORAGE_KIND_INLINE,
};
use crate::services::cache::{keys, EphemeralCache};
use crate::services::compression::{CompressionEngine, CompressionKind};
use crate::services::metadata_store::MetadataStore;
use crate::services::upload_service::{available_disk_space, UploadSession, DISK_HEADROOM};
use crate::utils::{mime, token};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Assembled files above this size never enter memory: they are compressed
/// (if at all) by streaming and stored externally.
const SPILL_THRESHOLD: i64 = 100 * 1024 * 1024;

/// Job records are readable for a day via the cache; the metadata sweep
/// prunes the durable rows after the 7-day retention.
const JOB_TTL: Duration = Duration::from_secs(24 * 3600);
/// Lifetime of the "processing" marker while a job runs.
const STATUS_TTL: Duration = Duration::from_secs(3600);
/// Failed markers stick around long enough for the client to see them.
const FAILED_STATUS_TTL: Duration = Duration::from_secs(24 * 3600);
/// Completed markers only bridge the gap until pollers hit the metadata
/// store directly.
const COMPLETED_STATUS_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub file_id: String,
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub delete_password: String,
}

/// Record of one assembly run. Single writer (the pipeline task); pollers
/// read the cache mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: String,
    pub upload_id: String,
    pub file_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(upload_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: token::generate_id(),
            upload_id: upload_id.to_string(),
            file_id: token::generate_id(),
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Fast-polled indicator keyed by file id, served by `/file/:id/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Assembles chunk files into a blob, applies compression, persists the
/// descriptor and publishes completion. One task per job.
pub struct ProcessingPipeline {
    cache: Arc<EphemeralCache>,
    metadata: Arc<MetadataStore>,
    blobs: Arc<BlobStore>,
    compressor: Arc<CompressionEngine>,
    config: Config,
}

impl ProcessingPipeline {
    pub fn new(
        cache: Arc<EphemeralCache>,
        metadata: Arc<MetadataStore>,
        blobs: Arc<BlobStore>,
        compressor: Arc<CompressionEngine>,
        config: Config,
    ) -> Self {
        Self {
            cache,
            metadata,
            blobs,
            compressor,
            config,
        }
    }

    /// Hand a pending job to a background task. Pipelines are detached from
    /// the requesting client; they only stop with the process.
    pub fn spawn_job(self: Arc<Self>, job: ProcessingJob, session: UploadSession) {
        tokio::spawn(async move {
            self.run(job, session).await;
        });
    }

    async fn run(&self, mut job: ProcessingJob, session: UploadSession) {
        tracing::info!(
            "⚙️  Processing started: job={} file={} filename={}",
            job.job_id,
            job.file_id,
            session.filename
        );

        job.status = JobStatus::Processing;
        job.progress = 10;
        self.update_job(&mut job).await;

        let assembled = match self.assemble(&session, &job.file_id).await {
            Ok(path) => path,
            Err(e) => {
                self.fail(&mut job, &session, format!("Failed to assemble file: {}", e))
                    .await;
                return;
            }
        };

        job.progress = 50;
        self.update_job(&mut job).await;

        if let Some(expected) = session.file_hash.clone() {
            match file_sha256(&assembled).await {
                Ok(actual) if actual.eq_ignore_ascii_case(&expected) => {
                    tracing::debug!("Hash verified for file {}", job.file_id);
                }
                Ok(actual) => {
                    let _ = fs::remove_file(&assembled).await;
                    self.fail(
                        &mut job,
                        &session,
                        format!("Hash mismatch: expected {}, got {}", expected, actual),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    let _ = fs::remove_file(&assembled).await;
                    self.fail(&mut job, &session, format!("Failed to hash file: {}", e))
                        .await;
                    return;
                }
            }
        }

        let descriptor = match self.persist_assembled(&session, &job.file_id, &assembled).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let _ = fs::remove_file(&assembled).await;
                self.fail(&mut job, &session, format!("Failed to store file: {}", e))
                    .await;
                return;
            }
        };

        job.progress = 90;
        self.update_job(&mut job).await;

        self.consume_session(&session).await;

        job.status = JobStatus::Completed;
        job.progress = 100;
        job.completed_at = Some(Utc::now());
        job.result = Some(JobResult {
            file_id: job.file_id.clone(),
            filename: session.filename.clone(),
            url: format!("/file/{}", job.file_id),
            size: descriptor.original_size,
            delete_password: descriptor.delete_token.clone(),
        });
        self.update_job(&mut job).await;

        // Publication barrier: the descriptor row is visible before pollers
        // can observe "completed". The short TTL redirects later polls to
        // the metadata store.
        let _ = self.cache.set(
            &keys::processing(&job.file_id),
            &ProcessingStatus {
                status: "completed".to_string(),
                filename: Some(session.filename.clone()),
                error: None,
                job_id: Some(job.job_id.clone()),
            },
            COMPLETED_STATUS_TTL,
        );

        tracing::info!(
            "✅ Processing completed: job={} file={} ({} bytes stored as {})",
            job.job_id,
            job.file_id,
            descriptor.stored_size,
            descriptor.compression
        );
    }

    /// Concatenate chunk files into `<temp>/<file_id>_assembled`, in order,
    /// with a bounded copy buffer. Partial output is removed on failure.
    async fn assemble(&self, session: &UploadSession, file_id: &str) -> Result<PathBuf> {
        let temp_dir = Path::new(&self.config.temp_dir);
        let available = available_disk_space(temp_dir).await;
        let required = (session.total_size as u64).saturating_mul(2) + DISK_HEADROOM;
        if let Some(available) = available {
            if available < required {
                return Err(anyhow!(
                    "insufficient disk space: available {} bytes, required {}",
                    available,
                    required
                ));
            }
        }

        let assembled_path = temp_dir.join(format!("{}_assembled", file_id));
        let result: Result<()> = async {
            let mut assembled = fs::File::create(&assembled_path).await?;
            for index in 0..session.total_chunks {
                let chunk_path = temp_dir
                    .join(&session.upload_id)
                    .join(format!("chunk_{}", index));
                let mut chunk = fs::File::open(&chunk_path)
                    .await
                    .with_context(|| format!("opening chunk {}", index))?;
                tokio::io::copy(&mut chunk, &mut assembled).await?;
            }
            assembled.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&assembled_path).await;
            return Err(e);
        }

        Ok(assembled_path)
    }

    /// Persist the assembled file. Large artifacts are streamed into the
    /// external tier; small ones are compressed in memory and usually end up
    /// inline.
    async fn persist_assembled(
        &self,
        session: &UploadSession,
        file_id: &str,
        assembled: &Path,
    ) -> Result<files::Model> {
        let size = fs::metadata(assembled).await?.len() as i64;

        if size > SPILL_THRESHOLD {
            let kind = self.compressor.select(&session.filename, size);
            let (blob_path, stored_size) = if kind == CompressionKind::None {
                let path = self.blobs.adopt_file(file_id, assembled).await?;
                (path, size)
            } else {
                let compressed_path =
                    Path::new(&self.config.temp_dir).join(format!("{}_compressed", file_id));
                stream_compress(
                    self.compressor.clone(),
                    assembled.to_path_buf(),
                    compressed_path.clone(),
                    kind,
                )
                .await?;
                let stored_size = fs::metadata(&compressed_path).await?.len() as i64;
                let path = self.blobs.adopt_file(file_id, &compressed_path).await?;
                let _ = fs::remove_file(assembled).await;
                (path, stored_size)
            };

            return self
                .save_descriptor(
                    file_id,
                    &session.filename,
                    size,
                    stored_size,
                    kind,
                    StoredBlob::External(blob_path),
                    session.download_password.clone(),
                )
                .await;
        }

        let content = fs::read(assembled).await?;
        let _ = fs::remove_file(assembled).await;

        let descriptor = self
            .store_bytes(file_id, &session.filename, content, session.download_password.clone())
            .await?;
        Ok(descriptor)
    }

    /// Compress-and-store for in-memory artifacts. Shared by the pipeline's
    /// small path and the single-shot upload handler.
    pub async fn store_bytes(
        &self,
        file_id: &str,
        filename: &str,
        content: Vec<u8>,
        download_password: Option<String>,
    ) -> Result<files::Model> {
        let original_size = content.len() as i64;
        let kind = self.compressor.select(filename, original_size);

        let compressor = self.compressor.clone();
        let compressed = tokio::task::spawn_blocking(move || compressor.compress(&content, kind))
            .await
            .context("compression task panicked")??;
        let stored_size = compressed.len() as i64;

        let blob = self.blobs.put(file_id, compressed).await?;

        self.save_descriptor(
            file_id,
            filename,
            original_size,
            stored_size,
            kind,
            blob,
            download_password,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn save_descriptor(
        &self,
        file_id: &str,
        filename: &str,
        original_size: i64,
        stored_size: i64,
        kind: CompressionKind,
        blob: StoredBlob,
        download_password: Option<String>,
    ) -> Result<files::Model> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.config.file_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let delete_token = token::generate_password();

        let (storage_kind, storage_path, content) = match blob {
            StoredBlob::Inline(bytes) => (STORAGE_KIND_INLINE, None, Some(bytes)),
            StoredBlob::External(path) => (
                STORAGE_KIND_EXTERNAL,
                Some(path.to_string_lossy().into_owned()),
                None,
            ),
        };
        let external_path = storage_path.clone();

        let has_download_token = download_password.is_some();
        let descriptor = files::ActiveModel {
            id: Set(file_id.to_string()),
            filename: Set(filename.to_string()),
            mime_type: Set(mime::mime_type_for(filename)),
            original_size: Set(original_size),
            stored_size: Set(stored_size),
            compression: Set(kind.as_str().to_string()),
            storage_kind: Set(storage_kind.to_string()),
            storage_path: Set(storage_path),
            content: Set(content),
            created_at: Set(now.into()),
            expires_at: Set(expires_at.into()),
            delete_token: Set(delete_token),
            download_token: Set(download_password),
            has_download_token: Set(has_download_token),
        };

        let saved = match self.metadata.save(descriptor).await {
            Ok(model) => model,
            Err(e) => {
                // Roll the blob back so no orphan survives a failed save
                if let Some(path) = external_path {
                    let _ = self.blobs.delete(Path::new(&path)).await;
                }
                return Err(anyhow!(e));
            }
        };

        let mut mirror = saved.clone();
        mirror.content = None;
        let ttl = (expires_at - now)
            .to_std()
            .unwrap_or(Duration::from_secs(24 * 3600));
        let _ = self.cache.set(&keys::file(file_id), &mirror, ttl);
        self.cache.zadd(expires_at.timestamp(), file_id);

        Ok(saved)
    }

    /// Write the job through to cache and database.
    async fn update_job(&self, job: &mut ProcessingJob) {
        job.updated_at = Utc::now();

        let _ = self
            .cache
            .set(&keys::processing_job(&job.job_id), job, JOB_TTL);

        let row = processing_jobs::ActiveModel {
            job_id: Set(job.job_id.clone()),
            upload_id: Set(job.upload_id.clone()),
            file_id: Set(Some(job.file_id.clone())),
            status: Set(job.status.as_str().to_string()),
            progress: Set(job.progress as i32),
            error_message: Set(job.error.clone()),
            result: Set(job
                .result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok())),
            created_at: Set(job.created_at.into()),
            updated_at: Set(job.updated_at.into()),
            completed_at: Set(job.completed_at.map(Into::into)),
        };
        if let Err(e) = self.metadata.save_job(row).await {
            tracing::warn!("Failed to persist job {}: {}", job.job_id, e);
        }
    }

    async fn fail(&self, job: &mut ProcessingJob, session: &UploadSession, message: String) {
        tracing::error!("❌ Processing failed for file {}: {}", job.file_id, message);

        job.status = JobStatus::Failed;
        job.error = Some(message.clone());
        job.completed_at = Some(Utc::now());
        self.update_job(job).await;

        let _ = self.cache.set(
            &keys::processing(&job.file_id),
            &ProcessingStatus {
                status: "failed".to_string(),
                filename: Some(session.filename.clone()),
                error: Some(message),
                job_id: Some(job.job_id.clone()),
            },
            FAILED_STATUS_TTL,
        );
    }

    /// Remove the session record and its scratch directory once the artifact
    /// is durably stored.
    async fn consume_session(&self, session: &UploadSession) {
        self.cache.del(&keys::chunk_upload(&session.upload_id));
        if let Err(e) = self.metadata.remove_session(&session.upload_id).await {
            tracing::warn!(
                "Failed to remove session row {}: {}",
                session.upload_id,
                e
            );
        }
        let scratch = Path::new(&self.config.temp_dir).join(&session.upload_id);
        if let Err(e) = fs::remove_dir_all(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch dir {}: {}", scratch.display(), e);
            }
        }
    }

    /// TTL for the initial "processing" marker set at complete().
    pub fn processing_status_ttl() -> Duration {
        STATUS_TTL
    }
}

/// Stream a file through a codec into `dest` on the blocking pool.
async fn stream_compress(
    compressor: Arc<CompressionEngine>,
    source: PathBuf,
    dest: PathBuf,
    kind: CompressionKind,
) -> Result<()> {
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut input = std::io::BufReader::new(std::fs::File::open(&source)?);
        let output = std::fs::File::create(&dest)?;
        let mut writer = compressor.wrap_writer(std::io::BufWriter::new(output), kind)?;

        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let n = input.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
        }
        let inner = writer.finish()?;
        inner.into_inner()?.sync_all()?;
        Ok(())
    })
    .await
    .context("compression task panicked")?;

    result.context("streaming compression failed")
}

/// Streaming SHA-256 of a file, hex-encoded.
async fn file_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .context("hash task panicked")?
    .context("hashing assembled file failed")
}
