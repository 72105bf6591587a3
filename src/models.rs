//! Durable record types mirrored by the room directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A code-addressed room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    /// 6-character human-shareable code, unique among active rooms
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable mirror of one live participant attachment to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: i64,
    pub room_id: i64,
    /// Process-unique id of the live connection this record mirrors
    pub connection_id: String,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub connected_at: DateTime<Utc>,
}

/// Metadata for one uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransfer {
    pub id: i64,
    pub room_id: i64,
    /// Collision-resistant stored name in the blob store
    pub filename: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: i64,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub download_count: i64,
}

/// Fields required to persist a new `FileTransfer`
#[derive(Debug, Clone)]
pub struct NewFile {
    pub room_id: i64,
    pub filename: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: i64,
    pub uploaded_by: String,
}
