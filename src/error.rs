// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

/// 用户库查询失败。只在排行榜内部消化，永远不会推送给订阅者。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User store query timed out after {0:?}")]
    Timeout(Duration),

    #[error("User store unavailable: {0}")]
    Unavailable(String),
}

// HTTP 处理层的错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Route {0} not found")]
    RouteNotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 服务端记录完整错误
        tracing::error!("HTTP Handler Error: {}", self);

        let (status, message) = match &self {
            AppError::RoomNotFound(room) => (StatusCode::NOT_FOUND, format!("Room {} not found", room)),
            AppError::RouteNotFound(path) => (StatusCode::NOT_FOUND, format!("Route {} not found", path)),
            // 其余错误不向客户端暴露细节
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong!".to_string(),
            ),
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
