use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Blobs larger than this are written to the local filesystem instead of
/// being inlined into the metadata row. Decided once at write time, never
/// re-evaluated for existing blobs.
pub const EXTERNAL_THRESHOLD: usize = 1024 * 1024 * 1024;

pub const STORAGE_KIND_INLINE: &str = "inline";
pub const STORAGE_KIND_EXTERNAL: &str = "external";

/// Where `put` decided to keep the bytes.
#[derive(Debug)]
pub enum StoredBlob {
    /// Caller persists these bytes in the metadata row.
    Inline(Vec<u8>),
    /// Bytes are on disk at this path.
    External(PathBuf),
}

/// Hybrid content persistence: small blobs stay inline, large blobs live
/// under `<scratch_root>/files/<id>`. External writes are atomic
/// (write-temp, fsync, rename, fsync directory).
pub struct BlobStore {
    files_dir: PathBuf,
}

impl BlobStore {
    pub fn new(scratch_root: impl AsRef<Path>) -> Self {
        Self {
            files_dir: scratch_root.as_ref().join("files"),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.files_dir)
            .await
            .with_context(|| format!("creating blob directory {}", self.files_dir.display()))?;
        Ok(())
    }

    pub fn external_path(&self, id: &str) -> PathBuf {
        self.files_dir.join(id)
    }

    /// Persist `bytes` for `id`, choosing the tier by size.
    pub async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<StoredBlob> {
        if bytes.len() <= EXTERNAL_THRESHOLD {
            return Ok(StoredBlob::Inline(bytes));
        }

        let final_path = self.external_path(id);
        let temp_path = self.files_dir.join(format!(".{}.tmp", id));

        let write_result: Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &final_path).await?;
            sync_dir(&self.files_dir).await?;
            Ok(())
        }
        .await;

        if let Err(e) = write_result {
            // Never leave a partial blob behind
            let _ = fs::remove_file(&temp_path).await;
            let _ = fs::remove_file(&final_path).await;
            return Err(e).with_context(|| format!("writing external blob {}", id));
        }

        Ok(StoredBlob::External(final_path))
    }

    /// Move an already-materialized file (the pipeline's assembled or
    /// compressed scratch output) into the external area by rename, without
    /// it ever passing through memory.
    pub async fn adopt_file(&self, id: &str, source: &Path) -> Result<PathBuf> {
        let final_path = self.external_path(id);
        fs::rename(source, &final_path)
            .await
            .with_context(|| format!("adopting {} as blob {}", source.display(), id))?;
        sync_dir(&self.files_dir).await?;
        Ok(final_path)
    }

    /// Open an external blob for reading (random access via the file).
    pub async fn open(&self, path: &Path) -> std::io::Result<fs::File> {
        fs::File::open(path).await
    }

    /// Idempotent delete; a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting blob {}", path.display())),
        }
    }
}

/// Make the rename durable by syncing the containing directory entry.
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(&dir)?.sync_all())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_small_blob_stays_inline() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.init().await.unwrap();

        match store.put("small", b"hello".to_vec()).await.unwrap() {
            StoredBlob::Inline(bytes) => assert_eq!(bytes, b"hello"),
            StoredBlob::External(_) => panic!("small blob must not spill to disk"),
        }
    }

    #[tokio::test]
    async fn test_adopt_and_open() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.init().await.unwrap();

        let source = dir.path().join("assembled");
        tokio::fs::write(&source, b"assembled bytes").await.unwrap();

        let path = store.adopt_file("abc", &source).await.unwrap();
        assert!(!source.exists());
        assert_eq!(path, store.external_path("abc"));

        let content = tokio::fs::read(&path).await.unwrap();
        assert_eq!(content, b"assembled bytes");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.init().await.unwrap();

        let path = store.external_path("gone");
        tokio::fs::write(&path, b"x").await.unwrap();

        store.delete(&path).await.unwrap();
        // Second delete of a missing file succeeds
        store.delete(&path).await.unwrap();
    }
}
