//! Disk-backed blob store for uploaded file bytes

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

/// Reject stored names that could escape the base directory
fn validate_stored_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::Validation("Invalid file name".to_string()));
    }
    Ok(())
}

/// Blob store rooted at a single directory, with a per-blob size cap
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: u64,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::Storage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Open an incremental writer under a fresh collision-resistant stored
    /// name. The original filename is never reused; only a sanitized
    /// extension is carried over.
    pub async fn writer(&self, original_name: &str) -> Result<BlobWriter, ApiError> {
        let stored_name = match sanitized_extension(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.base_path.join(&stored_name);

        let file = fs::File::create(&path)
            .await
            .map_err(|e| ApiError::Storage(format!("Failed to create blob file: {}", e)))?;

        Ok(BlobWriter {
            file: Some(file),
            path,
            stored_name,
            written: 0,
            max_size: self.max_size,
        })
    }

    pub async fn exists(&self, stored_name: &str) -> bool {
        if validate_stored_name(stored_name).is_err() {
            return false;
        }
        fs::try_exists(self.base_path.join(stored_name))
            .await
            .unwrap_or(false)
    }

    /// Delete a stored blob
    pub async fn remove(&self, stored_name: &str) -> Result<(), ApiError> {
        validate_stored_name(stored_name)?;
        fs::remove_file(self.base_path.join(stored_name))
            .await
            .map_err(|e| {
                ApiError::Storage(format!("Failed to remove blob {}: {}", stored_name, e))
            })
    }

    /// Open a blob for streaming reads
    pub async fn open(&self, stored_name: &str) -> Result<fs::File, ApiError> {
        validate_stored_name(stored_name)?;
        fs::File::open(self.base_path.join(stored_name))
            .await
            .map_err(|e| ApiError::Storage(format!("Failed to open blob {}: {}", stored_name, e)))
    }
}

/// Extension of the original filename, if it is plain enough to keep
fn sanitized_extension(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?;
    if ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

/// Incremental writer that enforces the size cap mid-stream and removes
/// the partial file on overflow or abort, so no orphaned partial blob
/// outlives a failed upload.
pub struct BlobWriter {
    file: Option<fs::File>,
    path: PathBuf,
    stored_name: String,
    written: u64,
    max_size: u64,
}

impl BlobWriter {
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), ApiError> {
        let Some(file) = self.file.as_mut() else {
            return Err(ApiError::Storage("Write after abort".to_string()));
        };

        self.written += data.len() as u64;
        if self.written > self.max_size {
            let size = self.written;
            self.discard().await;
            return Err(ApiError::PayloadTooLarge {
                size,
                max: self.max_size,
            });
        }

        if let Err(e) = file.write_all(data).await {
            self.discard().await;
            return Err(ApiError::Storage(format!("Failed to write blob: {}", e)));
        }
        Ok(())
    }

    /// Flush and return the stored name and total size
    pub async fn finish(mut self) -> Result<(String, u64), ApiError> {
        let Some(mut file) = self.file.take() else {
            return Err(ApiError::Storage("Finish after abort".to_string()));
        };
        if let Err(e) = file.flush().await {
            drop(file);
            self.discard().await;
            return Err(ApiError::Storage(format!("Failed to flush blob: {}", e)));
        }
        debug!(stored_name = %self.stored_name, size = self.written, "Stored blob");
        Ok((self.stored_name, self.written))
    }

    /// Drop the partial blob (upload failed upstream)
    pub async fn abort(mut self) {
        self.discard().await;
    }

    async fn discard(&mut self) {
        self.file = None;
        let _ = fs::remove_file(&self.path).await;
    }
}
