// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ==============================================================================
// 1. 排行榜行 (浏览器端直接渲染)
// ==============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub user_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "city")]
    pub locality: String,
    // 评分引擎尚未接入时为 null
    pub score: Option<f64>,
    pub rank: u32,
    pub streak: u32,
    pub achievements: Vec<String>,
}

// ==============================================================================
// 2. Socket 消息
// ==============================================================================

/// `join-leaderboard` 的负载。字段全部可选，任何缺失或非法值都会被降级处理。
#[derive(Debug, Deserialize, Default, Clone)]
pub struct JoinLeaderboardPayload {
    #[serde(default, alias = "locality")]
    pub city: Option<String>,
    #[serde(default, rename = "type", alias = "scope")]
    pub scope: Option<String>,
}

impl JoinLeaderboardPayload {
    /// Lenient parse: anything that is not a well-formed object becomes the default payload.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// `leaderboard-update`: one ranking snapshot for a room.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdate {
    pub room: String,
    pub updated_at: DateTime<Utc>,
    pub entries: Arc<Vec<RankEntry>>,
}

/// `score-update`: 个人分数占位消息，每次 join 发送一次
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub user_id: String,
    pub score: Option<f64>,
    pub rank: Option<u32>,
    pub streak: u32,
}

impl ScoreUpdate {
    pub fn placeholder() -> Self {
        Self {
            user_id: "current-user".to_string(),
            score: None,
            rank: None,
            streak: 0,
        }
    }
}

// ==============================================================================
// 3. HTTP 响应
// ==============================================================================

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room: String,
    pub members: usize,
    pub ticker_running: bool,
    pub entries: usize,
    pub fingerprint: String,
    pub refreshed_at: Option<DateTime<Utc>>,
}
