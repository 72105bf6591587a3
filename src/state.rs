//! Application state

use std::sync::Arc;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::directory::{MemoryDirectory, RoomDirectory};
use crate::error::ApiError;
use crate::registry::ConnectionRegistry;

/// Shared state injected into every handler
pub struct AppState {
    /// Live connections and room fan-out
    pub registry: ConnectionRegistry,
    /// Durable room/connection/file records
    pub directory: Arc<dyn RoomDirectory>,
    /// Uploaded file bytes
    pub blobs: BlobStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, ApiError> {
        let blobs = BlobStore::new(config.upload.dir.clone(), config.upload.max_bytes).await?;
        Ok(Self {
            registry: ConnectionRegistry::new(),
            directory: Arc::new(MemoryDirectory::new()),
            blobs,
            config: Arc::new(config),
        })
    }
}
