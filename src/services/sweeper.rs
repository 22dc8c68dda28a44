use crate::services::blob_store::BlobStore;
use crate::services::cache::{keys, EphemeralCache};
use crate::services::metadata_store::MetadataStore;
use crate::services::upload_service::{available_disk_space, UploadCoordinator};
use crate::config::Config;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const METADATA_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
/// Below this head-room the sweeper triggers the aggressive scratch cleanup.
const LOW_DISK_WATERMARK: u64 = 5 * 1024 * 1024 * 1024;

/// Periodic deletion of expired files, idle chunk sessions and stale rows.
/// Runs two loops: a fast cache sweep and an hourly metadata sweep. Both
/// are idempotent and safe to run concurrently with retrieval, which
/// re-checks expiry on every read.
pub struct ExpirySweeper {
    cache: Arc<EphemeralCache>,
    metadata: Arc<MetadataStore>,
    blobs: Arc<BlobStore>,
    coordinator: Arc<UploadCoordinator>,
    config: Config,
    shutdown: watch::Receiver<bool>,
}

impl ExpirySweeper {
    pub fn new(
        cache: Arc<EphemeralCache>,
        metadata: Arc<MetadataStore>,
        blobs: Arc<BlobStore>,
        coordinator: Arc<UploadCoordinator>,
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            metadata,
            blobs,
            coordinator,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🧹 Expiry sweeper started");

        let mut cache_tick = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        let mut metadata_tick = tokio::time::interval(METADATA_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Expiry sweeper shutting down");
                    break;
                }
                _ = cache_tick.tick() => {
                    self.sweep_cache().await;
                }
                _ = metadata_tick.tick() => {
                    self.sweep_metadata().await;
                }
            }
        }
    }

    /// Fast loop: drain the expiry-ordered file set, drop companion cache
    /// entries, destroy idle sessions and react to low disk space.
    async fn sweep_cache(&self) {
        let now = Utc::now().timestamp();
        let expired = self.cache.zrange_up_to(now);
        for file_id in &expired {
            self.cache
                .del_many([keys::file(file_id), keys::content(file_id)]);
            self.cache.zrem(file_id);
        }
        if !expired.is_empty() {
            tracing::info!("Swept {} expired cache mirrors", expired.len());
        }

        let evicted = self.cache.purge_expired();
        if evicted > 0 {
            tracing::debug!("Evicted {} lapsed cache entries", evicted);
        }

        let idle = self.coordinator.cleanup_idle_sessions().await;
        if idle > 0 {
            tracing::info!("Destroyed {} idle upload sessions", idle);
        }

        if let Some(available) = available_disk_space(Path::new(&self.config.temp_dir)).await {
            if available < LOW_DISK_WATERMARK {
                self.coordinator.aggressive_cleanup().await;
            }
        }
    }

    /// Slow loop: authoritative sweep of the metadata store.
    async fn sweep_metadata(&self) {
        match self.metadata.sweep_expired(&self.blobs).await {
            Ok(report) => {
                if report.files_removed > 0
                    || report.logs_removed > 0
                    || report.jobs_removed > 0
                    || report.sessions_removed > 0
                {
                    tracing::info!(
                        "🗑️  Metadata sweep: {} files, {} logs, {} jobs, {} sessions removed",
                        report.files_removed,
                        report.logs_removed,
                        report.jobs_removed,
                        report.sessions_removed
                    );
                }
            }
            Err(e) => tracing::error!("Metadata sweep failed: {}", e),
        }
    }
}
