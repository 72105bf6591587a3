//! Client-server message protocol definitions
//!
//! Every frame is a JSON envelope with a `type` tag and an optional
//! `payload`. Inbound frames are parsed in two stages so that a payload
//! that fails to deserialize is reported to the sender, while a `type`
//! this server does not know is an explicit `Unknown` branch that gets
//! ignored (forward compatibility).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{ConnectionRecord, FileTransfer, Room};

/// Raw inbound envelope, before per-type payload decoding
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// `join_room` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_code: String,
    /// Opaque client-supplied info, relayed as-is in `user_joined`
    #[serde(default)]
    pub user_info: Value,
}

/// Client → server message
#[derive(Debug, Clone)]
pub enum ClientMessage {
    JoinRoom(JoinRoomPayload),
    Ping,
    /// A `type` value this server does not handle; ignored by policy
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed(#[from] serde_json::Error),
}

impl ClientMessage {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let msg = match envelope.kind.as_str() {
            "join_room" => ClientMessage::JoinRoom(serde_json::from_value(envelope.payload)?),
            "ping" => ClientMessage::Ping,
            _ => ClientMessage::Unknown(envelope.kind),
        };
        Ok(msg)
    }
}

/// Server → client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomJoined { room: Room, connection_id: String },
    RoomState {
        connections: Vec<ConnectionRecord>,
        files: Vec<FileTransfer>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        connection_id: String,
        user_info: Value,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft { connection_id: String },
    FileUploaded(FileTransfer),
    Error { message: String },
    Pong,
}
