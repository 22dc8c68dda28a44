use crate::api::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How long a request may wait for a permit before being refused. Client
/// disconnection cancels the wait earlier.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded admission for the upload and download paths. The streaming media
/// path deliberately bypasses this so long-lived streams cannot starve
/// short requests of permits.
pub struct AdmissionController {
    uploads: Arc<Semaphore>,
    downloads: Arc<Semaphore>,
}

impl AdmissionController {
    pub fn new(upload_permits: usize, download_permits: usize) -> Self {
        Self {
            uploads: Arc::new(Semaphore::new(upload_permits)),
            downloads: Arc::new(Semaphore::new(download_permits)),
        }
    }

    pub async fn acquire_upload(&self) -> Result<OwnedSemaphorePermit, AppError> {
        Self::acquire(self.uploads.clone()).await
    }

    pub async fn acquire_download(&self) -> Result<OwnedSemaphorePermit, AppError> {
        Self::acquire(self.downloads.clone()).await
    }

    async fn acquire(semaphore: Arc<Semaphore>) -> Result<OwnedSemaphorePermit, AppError> {
        match tokio::time::timeout(ACQUIRE_TIMEOUT, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(AppError::ServiceBusy(
                "Server busy, please try again later".to_string(),
            )),
        }
    }
}
