//! Roomdrop server: code-addressed rooms for real-time file sharing

mod blob_store;
mod config;
mod directory;
mod error;
mod handlers;
mod models;
mod protocol;
mod registry;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, DefaultBodyLimit, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::Config;
use futures::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use state::AppState;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // Logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(config.clone()).await?);

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // slack over the blob cap for multipart framing overhead
    let body_limit = (config.upload.max_bytes as usize).saturating_add(1024 * 1024);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/rooms", post(handlers::create_room))
        .route("/api/rooms/join", post(handlers::join_room))
        .route("/api/rooms/:room_id/files", get(handlers::list_room_files))
        .route("/api/rooms/:room_id/upload", post(handlers::upload_file))
        .route(
            "/api/rooms/:room_id/connections",
            get(handlers::list_room_connections),
        )
        .route("/api/files/:file_id/download", get(handlers::download_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Roomdrop server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Roomdrop</h1><p>WebSocket endpoint: /ws — HTTP API under /api</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "roomdrop",
        "connections": state.registry.len(),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, user_agent))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    addr: SocketAddr,
    user_agent: Option<String>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // register before processing any message
    let connection_id = handlers::handle_connection(
        &state,
        tx.clone(),
        Some(addr.ip().to_string()),
        user_agent,
    );

    // outbound send task
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // inbound messages, serialized per connection
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                Ok(ClientMessage::JoinRoom(payload)) => {
                    handlers::handle_join_room(&state, &connection_id, payload).await;
                }
                Ok(ClientMessage::Ping) => {
                    handlers::handle_ping(&tx);
                }
                Ok(ClientMessage::Unknown(kind)) => {
                    // forward compatibility: unknown types are ignored
                    tracing::debug!(connection_id = %connection_id, kind = %kind, "Ignoring unknown message type");
                }
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Malformed message");
                    let _ = tx.send(ServerMessage::Error {
                        message: "Invalid message format".to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // clean and abrupt closes both land here, exactly once
    handlers::handle_disconnect(&state, &connection_id).await;
    send_task.abort();
}
