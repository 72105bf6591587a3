//! Room session protocol: the join_room transition

use crate::protocol::{JoinRoomPayload, ServerMessage};
use crate::state::AppState;

fn send_error(state: &AppState, connection_id: &str, message: &str) {
    state.registry.send_to(
        connection_id,
        ServerMessage::Error {
            message: message.to_string(),
        },
    );
}

/// `Connected -> Joined` transition.
///
/// On success the sender receives `room_joined`, the other open members
/// receive `user_joined`, and the sender then receives a `room_state`
/// snapshot. That ordering keeps the new member from seeing its own join
/// as a peer event while still ending with a fresh snapshot.
pub async fn handle_join_room(state: &AppState, connection_id: &str, payload: JoinRoomPayload) {
    if state.registry.room_of(connection_id).is_some() {
        send_error(state, connection_id, "Already joined a room");
        return;
    }

    let room = match state.directory.get_room_by_code(&payload.room_code).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            send_error(state, connection_id, "Room not found");
            return;
        }
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "Room lookup failed");
            send_error(state, connection_id, "Failed to join room");
            return;
        }
    };

    if let Err(e) = state.registry.set_room(connection_id, room.id) {
        send_error(state, connection_id, &e.to_string());
        return;
    }

    let (remote_addr, user_agent) = state
        .registry
        .meta_of(connection_id)
        .unwrap_or((None, None));

    if let Err(e) = state
        .directory
        .create_connection_record(room.id, connection_id, remote_addr, user_agent)
        .await
    {
        // No partial broadcast for a join that could not be persisted
        tracing::error!(connection_id = %connection_id, error = %e, "Failed to persist connection record");
        send_error(state, connection_id, "Failed to join room");
        return;
    }

    state.registry.send_to(
        connection_id,
        ServerMessage::RoomJoined {
            room: room.clone(),
            connection_id: connection_id.to_string(),
        },
    );

    state.registry.broadcast_except(
        room.id,
        connection_id,
        ServerMessage::UserJoined {
            connection_id: connection_id.to_string(),
            user_info: payload.user_info,
        },
    );

    let connections = state.directory.list_active_connection_records(room.id).await;
    let files = state.directory.list_files(room.id).await;
    match (connections, files) {
        (Ok(connections), Ok(files)) => {
            state.registry.send_to(
                connection_id,
                ServerMessage::RoomState { connections, files },
            );
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(room_id = room.id, error = %e, "Failed to assemble room state");
            send_error(state, connection_id, "Failed to load room state");
        }
    }

    tracing::info!(
        connection_id = %connection_id,
        room_id = room.id,
        room_code = %room.code,
        "User joined room"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UploadConfig};
    use crate::handlers::{handle_connection, handle_disconnect};
    use crate::models::Room;
    use crate::protocol::ServerMessage;
    use crate::state::AppState;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            port: 0,
            host: "127.0.0.1".to_string(),
            upload: UploadConfig {
                dir: dir.path().to_path_buf(),
                max_bytes: 1024 * 1024,
            },
            log_level: "info".to_string(),
        };
        (AppState::new(config).await.unwrap(), dir)
    }

    fn connect(state: &AppState) -> (String, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let id = handle_connection(state, tx, Some("127.0.0.1".to_string()), None);
        (id, rx)
    }

    async fn make_room(state: &AppState, code: &str) -> Room {
        state.directory.create_room(code).await.unwrap()
    }

    fn join_payload(code: &str, name: &str) -> JoinRoomPayload {
        JoinRoomPayload {
            room_code: code.to_string(),
            user_info: json!({ "name": name }),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn join_sends_confirmation_then_snapshot_and_notifies_peers() {
        let (state, _dir) = test_state().await;
        let room = make_room(&state, "ROOM01").await;

        let (id_a, mut rx_a) = connect(&state);
        handle_join_room(&state, &id_a, join_payload("ROOM01", "Alice")).await;
        drain(&mut rx_a);

        let (id_b, mut rx_b) = connect(&state);
        handle_join_room(&state, &id_b, join_payload("ROOM01", "Bob")).await;

        // B: exactly room_joined then room_state, nothing else
        let b_msgs = drain(&mut rx_b);
        assert_eq!(b_msgs.len(), 2);
        match &b_msgs[0] {
            ServerMessage::RoomJoined {
                room: joined,
                connection_id,
            } => {
                assert_eq!(joined.id, room.id);
                assert_eq!(connection_id, &id_b);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
        match &b_msgs[1] {
            ServerMessage::RoomState { connections, files } => {
                assert!(files.is_empty());
                let ids: Vec<&str> = connections
                    .iter()
                    .map(|c| c.connection_id.as_str())
                    .collect();
                assert!(ids.contains(&id_a.as_str()));
                assert!(ids.contains(&id_b.as_str()));
            }
            other => panic!("expected room_state, got {:?}", other),
        }

        // A: exactly one user_joined attributable to B
        let a_msgs = drain(&mut rx_a);
        assert_eq!(a_msgs.len(), 1);
        match &a_msgs[0] {
            ServerMessage::UserJoined {
                connection_id,
                user_info,
            } => {
                assert_eq!(connection_id, &id_b);
                assert_eq!(user_info["name"], "Bob");
            }
            other => panic!("expected user_joined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_code_yields_one_error_and_no_state_change() {
        let (state, _dir) = test_state().await;
        make_room(&state, "ROOM02").await;

        let (id, mut rx) = connect(&state);
        handle_join_room(&state, &id, join_payload("NOSUCH", "Alice")).await;

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::Error { .. }));

        assert_eq!(state.registry.room_of(&id), None);
        let room = state
            .directory
            .get_room_by_code("ROOM02")
            .await
            .unwrap()
            .unwrap();
        assert!(state
            .directory
            .list_active_connection_records(room.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn second_join_is_a_reported_protocol_error() {
        let (state, _dir) = test_state().await;
        make_room(&state, "ROOM03").await;
        make_room(&state, "ROOM04").await;

        let (id, mut rx) = connect(&state);
        handle_join_room(&state, &id, join_payload("ROOM03", "Alice")).await;
        drain(&mut rx);

        handle_join_room(&state, &id, join_payload("ROOM04", "Alice")).await;
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], ServerMessage::Error { .. }));

        // still in the first room
        let room3 = state
            .directory
            .get_room_by_code("ROOM03")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.registry.room_of(&id), Some(room3.id));
    }

    #[tokio::test]
    async fn disconnect_broadcasts_user_left_and_deactivates_record() {
        let (state, _dir) = test_state().await;
        let room = make_room(&state, "ROOM05").await;

        let (id_a, mut rx_a) = connect(&state);
        let (id_b, mut rx_b) = connect(&state);
        handle_join_room(&state, &id_a, join_payload("ROOM05", "Alice")).await;
        handle_join_room(&state, &id_b, join_payload("ROOM05", "Bob")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_disconnect(&state, &id_b).await;

        let a_msgs = drain(&mut rx_a);
        assert_eq!(a_msgs.len(), 1);
        match &a_msgs[0] {
            ServerMessage::UserLeft { connection_id } => assert_eq!(connection_id, &id_b),
            other => panic!("expected user_left, got {:?}", other),
        }

        let active = state
            .directory
            .list_active_connection_records(room.id)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].connection_id, id_a);
        assert_eq!(state.registry.connection_ids_in_room(room.id), vec![id_a]);
    }

    #[tokio::test]
    async fn disconnecting_unjoined_connection_emits_no_broadcast() {
        let (state, _dir) = test_state().await;
        make_room(&state, "ROOM06").await;

        let (id_a, mut rx_a) = connect(&state);
        handle_join_room(&state, &id_a, join_payload("ROOM06", "Alice")).await;
        drain(&mut rx_a);

        let (id_b, _rx_b) = connect(&state);
        handle_disconnect(&state, &id_b).await;

        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn disconnect_runs_exactly_once() {
        let (state, _dir) = test_state().await;
        make_room(&state, "ROOM07").await;

        let (id_a, mut rx_a) = connect(&state);
        let (id_b, mut rx_b) = connect(&state);
        handle_join_room(&state, &id_a, join_payload("ROOM07", "Alice")).await;
        handle_join_room(&state, &id_b, join_payload("ROOM07", "Bob")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        // simultaneous error + close events funnel into two calls
        handle_disconnect(&state, &id_b).await;
        handle_disconnect(&state, &id_b).await;

        let left: Vec<_> = drain(&mut rx_a)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::UserLeft { .. }))
            .collect();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn membership_tracks_join_and_disconnect_sequences() {
        let (state, _dir) = test_state().await;
        let room = make_room(&state, "ROOM08").await;

        let mut live = Vec::new();
        for i in 0..5 {
            let (id, rx) = connect(&state);
            handle_join_room(&state, &id, join_payload("ROOM08", &format!("u{}", i))).await;
            live.push((id, rx));
        }

        let (gone, _rx) = live.remove(2);
        handle_disconnect(&state, &gone).await;
        let (gone2, _rx2) = live.remove(0);
        handle_disconnect(&state, &gone2).await;

        let mut expected: Vec<String> = live.iter().map(|(id, _)| id.clone()).collect();
        expected.sort();
        let mut open = state.registry.connection_ids_in_room(room.id);
        open.sort();
        assert_eq!(open, expected);
    }
}
