// src/socket_handlers.rs
use super::{
    room::resolve_room,
    types::{JoinLeaderboardPayload, ScoreUpdate},
    ServerState,
};
use socketioxide::extract::{Data, SocketRef};
use tracing::info;

pub const JOIN_LEADERBOARD_EVENT: &str = "join-leaderboard";
pub const SCORE_UPDATE_EVENT: &str = "score-update";

pub async fn on_socket_connect(s: SocketRef, state: ServerState) {
    info!("🔌 [Socket.IO] Client connected: {}", s.id);
    register_join_leaderboard_handler(&s, state.clone());
    register_disconnect_handler(&s, state);
}

fn register_join_leaderboard_handler(socket: &SocketRef, state: ServerState) {
    socket.on(JOIN_LEADERBOARD_EVENT, move |s: SocketRef, payload: Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            // 负载格式不对也不拒绝，降级成默认房间
            let payload = JoinLeaderboardPayload::from_value(payload.0);
            let room = resolve_room(payload.city.as_deref(), payload.scope.as_deref());
            let client_id = s.id.to_string();

            // 先切换 socket 所在的房间，保证立即推送的快照能送达
            if let Some(previous) = state.leaderboard.room_of(&client_id) {
                if previous != room {
                    s.leave(previous.to_string());
                }
            }
            s.join(room.to_string());

            let update = state.leaderboard.join(&client_id, room).await;
            info!("📡 [SUB] {} -> {} ({} entries)", client_id, update.room, update.entries.len());

            s.emit(SCORE_UPDATE_EVENT, &ScoreUpdate::placeholder()).ok();
        }
    });
}

fn register_disconnect_handler(socket: &SocketRef, state: ServerState) {
    socket.on_disconnect(move |s: SocketRef| {
        let state = state.clone();
        async move {
            info!("👋 [Socket.IO] Client disconnected: {}", s.id);
            state.leaderboard.leave(&s.id.to_string());
        }
    });
}
