//! Durable room/connection/file record store
//!
//! The directory is an external collaborator behind a narrow trait so the
//! session and coordinator layers never touch storage details. The shipped
//! implementation keeps everything in process memory; a relational backend
//! can be swapped in behind the same trait.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::ApiError;
use crate::models::{ConnectionRecord, FileTransfer, NewFile, Room};

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Create a room with the given code. Fails if an active room already
    /// holds the code.
    async fn create_room(&self, code: &str) -> Result<Room, ApiError>;
    /// Active rooms only
    async fn get_room_by_code(&self, code: &str) -> Result<Option<Room>, ApiError>;
    /// Active rooms only
    async fn get_room_by_id(&self, id: i64) -> Result<Option<Room>, ApiError>;

    async fn create_connection_record(
        &self,
        room_id: i64,
        connection_id: &str,
        remote_addr: Option<String>,
        user_agent: Option<String>,
    ) -> Result<ConnectionRecord, ApiError>;
    async fn list_active_connection_records(
        &self,
        room_id: i64,
    ) -> Result<Vec<ConnectionRecord>, ApiError>;
    async fn deactivate_connection_record(&self, connection_id: &str) -> Result<(), ApiError>;

    async fn create_file_record(&self, new: NewFile) -> Result<FileTransfer, ApiError>;
    /// Most-recent-first
    async fn list_files(&self, room_id: i64) -> Result<Vec<FileTransfer>, ApiError>;
    async fn get_file_by_id(&self, id: i64) -> Result<Option<FileTransfer>, ApiError>;
    async fn increment_download_count(&self, file_id: i64) -> Result<(), ApiError>;
}

/// In-memory directory backed by sharded maps
#[derive(Default)]
pub struct MemoryDirectory {
    rooms: DashMap<i64, Room>,
    connections: DashMap<i64, ConnectionRecord>,
    files: DashMap<i64, FileTransfer>,
    next_room_id: AtomicI64,
    next_connection_id: AtomicI64,
    next_file_id: AtomicI64,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn create_room(&self, code: &str) -> Result<Room, ApiError> {
        let duplicate = self
            .rooms
            .iter()
            .any(|room| room.is_active && room.code == code);
        if duplicate {
            return Err(ApiError::Conflict(format!(
                "Room code {} is already in use",
                code
            )));
        }

        let id = self.next_room_id.fetch_add(1, Ordering::SeqCst) + 1;
        let room = Room {
            id,
            code: code.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.rooms.insert(id, room.clone());
        Ok(room)
    }

    async fn get_room_by_code(&self, code: &str) -> Result<Option<Room>, ApiError> {
        Ok(self
            .rooms
            .iter()
            .find(|room| room.is_active && room.code == code)
            .map(|room| room.value().clone()))
    }

    async fn get_room_by_id(&self, id: i64) -> Result<Option<Room>, ApiError> {
        Ok(self
            .rooms
            .get(&id)
            .filter(|room| room.is_active)
            .map(|room| room.value().clone()))
    }

    async fn create_connection_record(
        &self,
        room_id: i64,
        connection_id: &str,
        remote_addr: Option<String>,
        user_agent: Option<String>,
    ) -> Result<ConnectionRecord, ApiError> {
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ConnectionRecord {
            id,
            room_id,
            connection_id: connection_id.to_string(),
            remote_addr,
            user_agent,
            is_active: true,
            connected_at: Utc::now(),
        };
        self.connections.insert(id, record.clone());
        Ok(record)
    }

    async fn list_active_connection_records(
        &self,
        room_id: i64,
    ) -> Result<Vec<ConnectionRecord>, ApiError> {
        let mut records: Vec<ConnectionRecord> = self
            .connections
            .iter()
            .filter(|record| record.room_id == room_id && record.is_active)
            .map(|record| record.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn deactivate_connection_record(&self, connection_id: &str) -> Result<(), ApiError> {
        for mut record in self.connections.iter_mut() {
            if record.connection_id == connection_id && record.is_active {
                record.is_active = false;
            }
        }
        Ok(())
    }

    async fn create_file_record(&self, new: NewFile) -> Result<FileTransfer, ApiError> {
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst) + 1;
        let file = FileTransfer {
            id,
            room_id: new.room_id,
            filename: new.filename,
            original_name: new.original_name,
            mime_type: new.mime_type,
            size: new.size,
            uploaded_by: new.uploaded_by,
            uploaded_at: Utc::now(),
            download_count: 0,
        };
        self.files.insert(id, file.clone());
        Ok(file)
    }

    async fn list_files(&self, room_id: i64) -> Result<Vec<FileTransfer>, ApiError> {
        let mut files: Vec<FileTransfer> = self
            .files
            .iter()
            .filter(|file| file.room_id == room_id)
            .map(|file| file.value().clone())
            .collect();
        // ids break ties between same-instant uploads
        files.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(files)
    }

    async fn get_file_by_id(&self, id: i64) -> Result<Option<FileTransfer>, ApiError> {
        Ok(self.files.get(&id).map(|file| file.value().clone()))
    }

    async fn increment_download_count(&self, file_id: i64) -> Result<(), ApiError> {
        match self.files.get_mut(&file_id) {
            Some(mut file) => {
                file.download_count += 1;
                Ok(())
            }
            None => Err(ApiError::NotFound("File not found".to_string())),
        }
    }
}
