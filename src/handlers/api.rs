//! HTTP boundary: room creation/join, file upload/download, room listings

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use rand::Rng;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::models::{ConnectionRecord, FileTransfer, NewFile, Room};
use crate::protocol::ServerMessage;
use crate::state::AppState;

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_ATTEMPTS: usize = 32;

/// Random 6-character human-shareable room code
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Create a room under a fresh code, retrying on active-code collisions
pub async fn allocate_room(state: &AppState) -> Result<Room, ApiError> {
    for _ in 0..ROOM_CODE_ATTEMPTS {
        let code = generate_room_code();
        match state.directory.create_room(&code).await {
            Ok(room) => return Ok(room),
            Err(ApiError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(ApiError::Storage(
        "Failed to allocate a unique room code".to_string(),
    ))
}

/// Persist the FileTransfer record for a stored blob and fan the event out
/// to the room. The record is returned to the uploader regardless of how
/// many broadcast sends succeed.
pub async fn complete_upload(
    state: &AppState,
    room_id: i64,
    stored_name: String,
    original_name: String,
    mime_type: Option<String>,
    size: u64,
    uploaded_by: Option<String>,
) -> Result<FileTransfer, ApiError> {
    let new = NewFile {
        room_id,
        filename: stored_name.clone(),
        original_name,
        mime_type,
        size: size as i64,
        uploaded_by: uploaded_by.unwrap_or_else(|| "Anonymous".to_string()),
    };

    let record = match state.directory.create_file_record(new).await {
        Ok(record) => record,
        Err(e) => {
            // never leave a blob without a record behind
            let _ = state.blobs.remove(&stored_name).await;
            return Err(e);
        }
    };

    state
        .registry
        .broadcast(room_id, ServerMessage::FileUploaded(record.clone()));

    tracing::info!(
        room_id,
        file_id = record.id,
        original_name = %record.original_name,
        size = record.size,
        "File uploaded"
    );
    Ok(record)
}

/// Resolve a download: metadata lookup, blob presence, counter bump.
/// Both missing-metadata and missing-blob are 404 to the caller and only
/// distinguished in the logs.
pub async fn prepare_download(
    state: &AppState,
    file_id: i64,
) -> Result<(FileTransfer, tokio::fs::File), ApiError> {
    let file = match state.directory.get_file_by_id(file_id).await? {
        Some(file) => file,
        None => {
            tracing::warn!(file_id, "Download requested for unknown file id");
            return Err(ApiError::NotFound("File not found".to_string()));
        }
    };

    if !state.blobs.exists(&file.filename).await {
        tracing::warn!(
            file_id,
            stored_name = %file.filename,
            "File record exists but blob is missing"
        );
        return Err(ApiError::NotFound("File not found".to_string()));
    }

    state.directory.increment_download_count(file_id).await?;
    let blob = state.blobs.open(&file.filename).await?;
    Ok((file, blob))
}

// --- axum handlers ---------------------------------------------------------

pub async fn create_room(State(state): State<Arc<AppState>>) -> Result<Json<Room>, ApiError> {
    let room = allocate_room(&state).await?;
    tracing::info!(room_id = room.id, room_code = %room.code, "Room created");
    Ok(Json(room))
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    pub code: String,
}

pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<Room>, ApiError> {
    let code = req.code.trim();
    if code.len() != ROOM_CODE_LEN {
        return Err(ApiError::Validation("Invalid room code".to_string()));
    }

    match state.directory.get_room_by_code(code).await? {
        Some(room) => Ok(Json(room)),
        None => Err(ApiError::NotFound("Room not found".to_string())),
    }
}

pub async fn list_room_files(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> Result<Json<Vec<FileTransfer>>, ApiError> {
    Ok(Json(state.directory.list_files(room_id).await?))
}

pub async fn list_room_connections(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> Result<Json<Vec<ConnectionRecord>>, ApiError> {
    Ok(Json(
        state.directory.list_active_connection_records(room_id).await?,
    ))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<FileTransfer>, ApiError> {
    let room = state
        .directory
        .get_room_by_id(room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Room not found".to_string()))?;

    let mut uploaded_by: Option<String> = None;
    let mut stored: Option<(String, u64, String, Option<String>)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("uploadedBy") => {
                uploaded_by = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?,
                );
            }
            Some("file") if stored.is_none() => {
                let original_name = field.file_name().unwrap_or("file").to_string();
                let mime_type = field.content_type().map(str::to_string);

                // stream chunk-by-chunk; the writer enforces the size cap
                // and cleans up partial bytes on its own failures
                let mut writer = state.blobs.writer(&original_name).await?;
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => writer.write_chunk(&chunk).await?,
                        Ok(None) => break,
                        Err(e) => {
                            writer.abort().await;
                            return Err(ApiError::Validation(format!("Multipart error: {}", e)));
                        }
                    }
                }
                let (stored_name, size) = writer.finish().await?;
                stored = Some((stored_name, size, original_name, mime_type));
            }
            _ => {}
        }
    }

    let (stored_name, size, original_name, mime_type) =
        stored.ok_or_else(|| ApiError::Validation("No file uploaded".to_string()))?;

    let record = complete_upload(
        &state,
        room.id,
        stored_name,
        original_name,
        mime_type,
        size,
        uploaded_by,
    )
    .await?;
    Ok(Json(record))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<i64>,
) -> Result<Response, ApiError> {
    let (file, blob) = prepare_download(&state, file_id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.original_name.replace(['"', '\\'], "_")
    );
    let content_type = file
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream")
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, file.size)
        .body(Body::from_stream(ReaderStream::new(blob)))
        .map_err(|e| ApiError::Storage(format!("Failed to build download response: {}", e)))
}
