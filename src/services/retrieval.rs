use crate::api::error::AppError;
use crate::entities::files;
use crate::services::blob_store::{BlobStore, STORAGE_KIND_EXTERNAL};
use crate::services::cache::{keys, EphemeralCache};
use crate::services::compression::{CompressionEngine, CompressionKind};
use crate::utils::range::ByteRange;
use base64::Engine as _;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::{ReaderStream, SyncIoBridge};

/// Decompressed bytes of compressed blobs up to this size are mirrored in
/// the cache so repeated range requests do not pay the codec again.
const CONTENT_CACHE_LIMIT: i64 = 10 * 1024 * 1024;
const CONTENT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Opens blobs, applies decompression and slices ranges for the HTTP
/// surface.
pub struct RetrievalService {
    blobs: Arc<BlobStore>,
    compressor: Arc<CompressionEngine>,
    cache: Arc<EphemeralCache>,
}

impl RetrievalService {
    pub fn new(
        blobs: Arc<BlobStore>,
        compressor: Arc<CompressionEngine>,
        cache: Arc<EphemeralCache>,
    ) -> Self {
        Self {
            blobs,
            compressor,
            cache,
        }
    }

    /// Check that a descriptor's bytes are actually present (an external
    /// blob can be lost independently of its row).
    pub async fn content_available(&self, descriptor: &files::Model) -> bool {
        match external_path(descriptor) {
            Some(path) => tokio::fs::metadata(&path).await.is_ok(),
            None => true,
        }
    }

    /// The full, decompressed artifact. Small compressed blobs are served
    /// from (and populate) the `content:` cache mirror.
    pub async fn read_all(&self, descriptor: &files::Model) -> Result<Vec<u8>, AppError> {
        let kind = CompressionKind::parse(&descriptor.compression);
        let cacheable = kind != CompressionKind::None
            && descriptor.original_size <= CONTENT_CACHE_LIMIT;

        if cacheable {
            if let Some(encoded) = self.cache.get::<String>(&keys::content(&descriptor.id)) {
                if let Ok(content) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                    return Ok(content);
                }
            }
        }

        let raw = self.read_stored(descriptor).await?;
        let content = if kind == CompressionKind::None {
            raw
        } else {
            let compressor = self.compressor.clone();
            tokio::task::spawn_blocking(move || compressor.decompress(&raw, kind))
                .await
                .map_err(|e| AppError::Internal(format!("decompression task panicked: {}", e)))?
                .map_err(|e| AppError::Internal(format!("failed to decompress file: {}", e)))?
        };

        if cacheable {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&content);
            let _ = self
                .cache
                .set(&keys::content(&descriptor.id), &encoded, CONTENT_CACHE_TTL);
        }

        Ok(content)
    }

    /// Body for a full-artifact response.
    ///
    /// Uncompressed external blobs stream straight off the file; compressed
    /// external blobs stream through the decompressor on the blocking pool;
    /// inline blobs are decompressed in memory.
    pub async fn full_body(&self, descriptor: &files::Model) -> Result<axum::body::Body, AppError> {
        let kind = CompressionKind::parse(&descriptor.compression);

        match external_path(descriptor) {
            Some(path) => {
                if kind == CompressionKind::None {
                    let file = self.open_external(&path).await?;
                    Ok(axum::body::Body::from_stream(ReaderStream::new(file)))
                } else {
                    Ok(self.decompressing_body(path, kind))
                }
            }
            None => Ok(axum::body::Body::from(self.read_all(descriptor).await?)),
        }
    }

    /// Body for a single byte range of the artifact.
    ///
    /// Uncompressed external blobs seek directly; everything else is
    /// decompressed server-side and sliced (the explicit trade-off for
    /// ranges over compressed blobs).
    pub async fn range_body(
        &self,
        descriptor: &files::Model,
        range: ByteRange,
    ) -> Result<axum::body::Body, AppError> {
        let kind = CompressionKind::parse(&descriptor.compression);

        if kind == CompressionKind::None {
            if let Some(path) = external_path(descriptor) {
                let mut file = self.open_external(&path).await?;
                file.seek(std::io::SeekFrom::Start(range.start as u64))
                    .await?;
                let limited = file.take(range.len() as u64);
                return Ok(axum::body::Body::from_stream(ReaderStream::new(limited)));
            }
        }

        let content = self.read_all(descriptor).await?;
        let start = range.start as usize;
        let end = range.end as usize;
        if start >= content.len() || end >= content.len() {
            return Err(AppError::RangeNotSatisfiable(content.len() as i64));
        }
        Ok(axum::body::Body::from(content[start..=end].to_vec()))
    }

    /// Stored (still compressed) bytes of a blob.
    async fn read_stored(&self, descriptor: &files::Model) -> Result<Vec<u8>, AppError> {
        match external_path(descriptor) {
            Some(path) => tokio::fs::read(&path).await.map_err(|e| {
                tracing::error!(
                    "External blob missing for {}: {} ({})",
                    descriptor.id,
                    path.display(),
                    e
                );
                AppError::Internal("Stored content is unavailable".to_string())
            }),
            None => descriptor
                .content
                .clone()
                .ok_or_else(|| AppError::Internal("Inline content missing".to_string())),
        }
    }

    async fn open_external(&self, path: &Path) -> Result<tokio::fs::File, AppError> {
        self.blobs.open(path).await.map_err(|e| {
            tracing::error!("Failed to open blob {}: {}", path.display(), e);
            AppError::Internal("Stored content is unavailable".to_string())
        })
    }

    /// Stream a compressed external blob through its codec. A read error
    /// mid-stream can only be logged; headers are long gone.
    fn decompressing_body(&self, path: PathBuf, kind: CompressionKind) -> axum::body::Body {
        let compressor = self.compressor.clone();
        let (writer, reader) = tokio::io::duplex(64 * 1024);

        tokio::task::spawn_blocking(move || {
            let result = (|| -> std::io::Result<u64> {
                let file = std::fs::File::open(&path)?;
                let mut decoder = compressor.wrap_reader(BufReader::new(file), kind)?;
                let mut bridge = SyncIoBridge::new(writer);
                std::io::copy(&mut decoder, &mut bridge)
            })();

            if let Err(e) = result {
                tracing::error!("Error streaming blob {}: {}", path.display(), e);
            }
        });

        axum::body::Body::from_stream(ReaderStream::new(reader))
    }
}

fn external_path(descriptor: &files::Model) -> Option<PathBuf> {
    if descriptor.storage_kind == STORAGE_KIND_EXTERNAL {
        descriptor.storage_path.as_ref().map(PathBuf::from)
    } else {
        None
    }
}
