// src/config.rs
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    // 周期广播间隔
    pub tick_interval: Duration,
    // 超过该时间的房间缓存会在下一次访问时从用户库重新加载
    pub freshness_window: Duration,
    pub max_entries: usize,
    pub store_query_timeout: Duration,
    pub store_failure_alert_threshold: u32,
    // 最后一个订阅者离开后，空房间保留多久才被回收
    pub room_idle_eviction: Duration,
    pub suppress_unchanged_broadcasts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 5001,
            database_url: "sqlite:./data/leaderboard.db".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            tick_interval: Duration::from_secs(10),
            freshness_window: Duration::from_secs(60),
            max_entries: 20,
            store_query_timeout: Duration::from_secs(5),
            store_failure_alert_threshold: 3,
            room_idle_eviction: Duration::from_secs(60),
            suppress_unchanged_broadcasts: false,
        }
    }

    /// Defaults overridden by whatever is set in the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(port) = env_parse::<u16>("PORT") {
            config.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.cors_origins = parsed;
            }
        }
        if let Some(secs) = env_parse::<u64>("LEADERBOARD_TICK_SECS").filter(|s| *s > 0) {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEADERBOARD_FRESHNESS_SECS") {
            config.freshness_window = Duration::from_secs(secs);
            config.room_idle_eviction = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("LEADERBOARD_MAX_ENTRIES").filter(|m| *m > 0) {
            config.max_entries = max;
        }
        if let Some(secs) = env_parse::<u64>("LEADERBOARD_STORE_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.store_query_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = env_parse::<bool>("LEADERBOARD_SUPPRESS_UNCHANGED") {
            config.suppress_unchanged_broadcasts = flag;
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T>
where
    T::Err: Display,
{
    let raw = std::env::var(key).ok()?;
    raw.trim()
        .parse::<T>()
        .map_err(|e| {
            warn!("⚠️ [Config] Ignoring invalid {key}={raw:?}: {e}");
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let config = Config::new();
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.freshness_window, Duration::from_secs(60));
        assert_eq!(config.max_entries, 20);
        assert!(!config.suppress_unchanged_broadcasts);
        assert_eq!(config.port, 5001);
    }
}
