// src/lib.rs
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod http_handlers;
pub mod leaderboard;
pub mod ranking;
pub mod room;
pub mod socket_handlers;
pub mod state;
pub mod types;
pub mod user_store;

use anyhow::Context;
use config::Config;
use http::HeaderValue;
use leaderboard::LeaderboardManager;
use socketioxide::SocketIo;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_store::SqliteUserStore;

#[derive(Clone)]
pub struct ServerState {
    pub leaderboard: LeaderboardManager,
    pub config: Arc<Config>,
    pub io: SocketIo,
    pub db_pool: SqlitePool,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "city_leaderboard=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn connect_db(database_url: &str) -> anyhow::Result<SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
    use std::str::FromStr;

    let in_memory = database_url.contains(":memory:");
    if !in_memory {
        if let Some(parent) = std::path::Path::new(database_url.trim_start_matches("sqlite:")).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            }
        }
    }

    let mut db_opts = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?
        .create_if_missing(true)
        .pragma("busy_timeout", "5000");
    if !in_memory {
        db_opts = db_opts
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    // 内存库每个连接都是独立的库，只能用单连接
    let mut pool_opts = SqlitePoolOptions::new().max_connections(10);
    if in_memory {
        pool_opts = pool_opts.max_connections(1).idle_timeout(None).max_lifetime(None);
    }
    let db_pool = pool_opts
        .connect_with(db_opts)
        .await
        .context("Failed to connect to SQLite database")?;
    user_store::init_db(&db_pool)
        .await
        .context("Failed to initialize database schema")?;
    Ok(db_pool)
}

pub async fn setup_shared_state(config: Arc<Config>, io: SocketIo) -> anyhow::Result<ServerState> {
    let db_pool = connect_db(&config.database_url).await?;

    let store = Arc::new(SqliteUserStore::new(db_pool.clone()));
    let leaderboard = LeaderboardManager::new(config.clone(), store, Arc::new(io.clone()));
    info!(
        "🏆 [Leaderboard] Ready. Tick {:?} | Freshness {:?} | Max {} entries",
        config.tick_interval, config.freshness_window, config.max_entries
    );

    Ok(ServerState {
        leaderboard,
        config,
        io,
        db_pool,
    })
}

/// Configured origins as header values; unparsable entries are logged and dropped.
pub fn allowed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("⚠️ [CORS] Skipping invalid origin: {}", origin);
                None
            }
        })
        .collect()
}

pub fn cors_layer(config: &Config) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(&config.cors_origins)))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::response::IntoResponse;

    async fn memory_state() -> ServerState {
        let config = Arc::new(Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::new()
        });
        let (_layer, io) = SocketIo::new_layer();
        setup_shared_state(config, io).await.unwrap()
    }

    #[tokio::test]
    async fn snapshot_endpoint_reads_through_sqlite() {
        let state = memory_state().await;
        for (id, name, city) in [("1", "Meera", "Pune"), ("2", "Arjun", " pune ")] {
            sqlx::query("INSERT INTO users (id, name, city) VALUES (?, ?, ?)")
                .bind(id)
                .bind(name)
                .bind(city)
                .execute(&state.db_pool)
                .await
                .unwrap();
        }

        let axum::Json(update) = http_handlers::snapshot_handler(
            State(state.clone()),
            Path(("city".to_string(), "PUNE".to_string())),
        )
        .await;
        assert_eq!(update.room, "city:pune");
        let names: Vec<_> = update.entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Arjun", "Meera"]);

        let axum::Json(global) = http_handlers::snapshot_handler(
            State(state.clone()),
            Path(("global".to_string(), "anything".to_string())),
        )
        .await;
        assert_eq!(global.room, "global:all");
        assert_eq!(global.entries.len(), 2);
    }

    #[tokio::test]
    async fn health_and_room_lookup() {
        let state = memory_state().await;
        assert!(http_handlers::health_handler(State(state.clone())).await.is_ok());

        let missing = http_handlers::room_handler(State(state.clone()), Path("city:nowhere".to_string()))
            .await
            .unwrap_err();
        assert_eq!(missing.into_response().status(), http::StatusCode::NOT_FOUND);

        state.leaderboard.snapshot(&room::RoomKey::global()).await;
        let axum::Json(stats) = http_handlers::room_handler(State(state), Path("global:all".to_string()))
            .await
            .unwrap();
        assert_eq!(stats.members, 0);
        assert_eq!(stats.entries, 5);
    }

    #[test]
    fn invalid_cors_origins_are_dropped() {
        let origins = allowed_origins(&[
            "http://localhost:5173".to_string(),
            "bad\norigin".to_string(),
            "http://127.0.0.1:3000".to_string(),
        ]);
        assert_eq!(
            origins,
            vec![
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        );
        assert_eq!(allowed_origins(&Config::new().cors_origins).len(), 4);
    }
}
