//! Connection lifecycle: register, keepalive, disconnect

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::state::AppState;

/// Register a new physical connection in the live registry. Runs before
/// any message is processed for the socket.
pub fn handle_connection(
    state: &AppState,
    sender: UnboundedSender<ServerMessage>,
    remote_addr: Option<String>,
    user_agent: Option<String>,
) -> String {
    let connection_id = Uuid::new_v4().to_string();
    state
        .registry
        .register(&connection_id, sender, remote_addr, user_agent);

    tracing::info!(connection_id = %connection_id, "New connection established");
    connection_id
}

/// Liveness probe: reply to the sender only
pub fn handle_ping(sender: &UnboundedSender<ServerMessage>) {
    let _ = sender.send(ServerMessage::Pong);
}

/// Terminal transition for a connection. Safe to call for connections
/// that never joined a room; the registry guards against running twice
/// when close and error fire for the same socket.
pub async fn handle_disconnect(state: &AppState, connection_id: &str) {
    let Some(room_id) = state.registry.unregister(connection_id) else {
        return;
    };

    if let Some(room_id) = room_id {
        // Durable mirror is best-effort; the live registry is authoritative
        if let Err(e) = state
            .directory
            .deactivate_connection_record(connection_id)
            .await
        {
            tracing::warn!(connection_id = %connection_id, error = %e, "Failed to deactivate connection record");
        }

        state.registry.broadcast(
            room_id,
            ServerMessage::UserLeft {
                connection_id: connection_id.to_string(),
            },
        );
    }

    tracing::info!(connection_id = %connection_id, "Connection closed");
}
