// src/http_handlers.rs
use super::{
    error::AppError,
    room::resolve_room,
    types::{LeaderboardUpdate, RoomStats},
    ServerState,
};
use axum::{
    extract::{Path, State},
    http::Uri,
    response::Json as AxumJson,
};
use serde_json::{json, Value};

/// 服务信息
pub async fn root_handler() -> AxumJson<Value> {
    AxumJson(json!({
        "message": "City leaderboard service is running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "rooms": "/rooms",
            "snapshot": "/leaderboard/{scope}/{locality}",
            "socket": "join-leaderboard -> leaderboard-update"
        }
    }))
}

pub async fn health_handler(State(state): State<ServerState>) -> Result<AxumJson<Value>, AppError> {
    sqlx::query("SELECT 1").execute(&state.db_pool).await?;
    Ok(AxumJson(json!({ "status": "ok", "rooms": state.leaderboard.room_count() })))
}

pub async fn rooms_handler(State(state): State<ServerState>) -> AxumJson<Vec<RoomStats>> {
    AxumJson(state.leaderboard.room_stats())
}

/// Stats of a single live room, addressed by its key (e.g. `city:mumbai`).
pub async fn room_handler(
    State(state): State<ServerState>,
    Path(room): Path<String>,
) -> Result<AxumJson<RoomStats>, AppError> {
    state
        .leaderboard
        .room_stats()
        .into_iter()
        .find(|s| s.room == room)
        .map(AxumJson)
        .ok_or(AppError::RoomNotFound(room))
}

/// 当前快照，不订阅。scope/locality 的解析规则与 socket join 一致
pub async fn snapshot_handler(
    State(state): State<ServerState>,
    Path((scope, locality)): Path<(String, String)>,
) -> AxumJson<LeaderboardUpdate> {
    let room = resolve_room(Some(&locality), Some(&scope));
    AxumJson(state.leaderboard.snapshot(&room).await)
}

pub async fn not_found_handler(uri: Uri) -> AppError {
    AppError::RouteNotFound(uri.path().to_string())
}
