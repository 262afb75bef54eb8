// src/room.rs
use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN_LOCALITY: &str = "unknown";
pub const GLOBAL_LOCALITY: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomScope {
    City,
    Global,
}

impl RoomScope {
    /// 未知或缺失的 scope 一律按 city 处理
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("global") => RoomScope::Global,
            _ => RoomScope::City,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomScope::City => "city",
            RoomScope::Global => "global",
        }
    }
}

/// Canonical identity of a leaderboard room.
///
/// `locality` is already normalized: the lower-cased, trimmed city for
/// [`RoomScope::City`], or [`GLOBAL_LOCALITY`] for [`RoomScope::Global`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    scope: RoomScope,
    locality: String,
}

impl RoomKey {
    pub fn global() -> Self {
        Self {
            scope: RoomScope::Global,
            locality: GLOBAL_LOCALITY.to_string(),
        }
    }

    pub fn city(locality: &str) -> Self {
        Self {
            scope: RoomScope::City,
            locality: normalize_locality(Some(locality)),
        }
    }

    pub fn scope(&self) -> RoomScope {
        self.scope
    }

    pub fn locality(&self) -> &str {
        &self.locality
    }

    /// Global rooms and the `unknown` city sentinel both cover every user.
    pub fn covers_all_users(&self) -> bool {
        self.scope == RoomScope::Global || self.locality == UNKNOWN_LOCALITY
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.as_str(), self.locality)
    }
}

pub fn normalize_locality(raw: Option<&str>) -> String {
    let normalized = raw.unwrap_or_default().trim().to_lowercase();
    if normalized.is_empty() {
        UNKNOWN_LOCALITY.to_string()
    } else {
        normalized
    }
}

/// 将客户端传入的 (city, type) 解析为房间键，永不报错
pub fn resolve_room(locality: Option<&str>, scope: Option<&str>) -> RoomKey {
    match RoomScope::parse(scope) {
        RoomScope::Global => RoomKey::global(),
        RoomScope::City => RoomKey::city(locality.unwrap_or_default()),
    }
}
