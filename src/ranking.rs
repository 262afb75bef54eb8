// src/ranking.rs
use crate::room::{normalize_locality, RoomKey};
use crate::types::RankEntry;
use crate::user_store::UserRecord;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

const FALLBACK_NAMES: [&str; 5] = ["Ava", "Ben", "Cleo", "Dee", "Eli"];
const FALLBACK_LOCALITY: &str = "demo";

/// 房间无匹配用户时使用的演示数据，保证订阅者永远不会收到空榜单
pub fn fallback_entries() -> Vec<RankEntry> {
    FALLBACK_NAMES
        .iter()
        .enumerate()
        .map(|(idx, name)| RankEntry {
            user_id: format!("u{}", idx + 1),
            display_name: name.to_string(),
            locality: FALLBACK_LOCALITY.to_string(),
            score: None,
            rank: idx as u32 + 1,
            streak: 0,
            achievements: Vec::new(),
        })
        .collect()
}

/// Profile name, else the local part of the email, else "User".
pub fn display_name(user: &UserRecord) -> String {
    if let Some(name) = user.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    user.email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "User".to_string())
}

struct Candidate {
    user_id: String,
    display_name: String,
    locality: String,
    score: Option<f64>,
    streak: u32,
}

fn by_display_name(a: &Candidate, b: &Candidate) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

// 有分数时按分数降序(无分数的排在最后)，同分按名字
fn by_score_desc(a: &Candidate, b: &Candidate) -> Ordering {
    match (a.score, b.score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| by_display_name(a, b))
}

/// Turns the users selected for `room` into a capped, densely ranked board.
///
/// Ordering is score-descending whenever the store supplies scores, and
/// display name ascending otherwise. An empty selection yields
/// [`fallback_entries`].
pub fn derive_entries(users: Vec<UserRecord>, room: &RoomKey, max_entries: usize) -> Vec<RankEntry> {
    let mut candidates: Vec<Candidate> = users
        .into_iter()
        .filter(|u| room.covers_all_users() || normalize_locality(u.city.as_deref()) == room.locality())
        .map(|u| Candidate {
            display_name: display_name(&u),
            locality: normalize_locality(u.city.as_deref()),
            score: u.score.filter(|s| s.is_finite()),
            streak: u.streak.unwrap_or(0),
            user_id: u.id,
        })
        .collect();

    if candidates.is_empty() {
        return fallback_entries();
    }

    if candidates.iter().any(|c| c.score.is_some()) {
        candidates.sort_by(by_score_desc);
    } else {
        candidates.sort_by(by_display_name);
    }

    candidates
        .into_iter()
        .take(max_entries)
        .enumerate()
        .map(|(idx, c)| RankEntry {
            user_id: c.user_id,
            display_name: c.display_name,
            locality: c.locality,
            score: c.score,
            rank: idx as u32 + 1,
            streak: c.streak,
            achievements: Vec::new(),
        })
        .collect()
}

/// Stable digest of the identity-relevant fields of a board, in rank order.
pub fn fingerprint(entries: &[RankEntry]) -> String {
    let tuples: Vec<(&str, u32, &str, &str)> = entries
        .iter()
        .map(|e| (e.user_id.as_str(), e.rank, e.display_name.as_str(), e.locality.as_str()))
        .collect();
    // (String, u32, String, String) 元组数组的序列化不会失败
    let encoded = serde_json::to_vec(&tuples).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}
