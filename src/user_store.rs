// src/user_store.rs
//! Read-only view of the user/profile collection the leaderboard ranks.

use crate::error::StoreError;
use futures_util::future::BoxFuture;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum LocalityFilter {
    All,
    /// Normalized (trimmed, lower-cased) city name.
    City(String),
}

impl LocalityFilter {
    /// Unicode-aware: the stored city is trimmed of any whitespace and
    /// lower-cased the same way room keys are.
    pub fn matches(&self, city: Option<&str>) -> bool {
        match self {
            LocalityFilter::All => true,
            LocalityFilter::City(wanted) => city
                .map(|c| c.trim().to_lowercase() == *wanted)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub score: Option<f64>,
    pub streak: Option<u32>,
}

pub trait UserStore: Send + Sync + 'static {
    fn find_users_by_locality<'a>(
        &'a self,
        filter: &'a LocalityFilter,
    ) -> BoxFuture<'a, Result<Vec<UserRecord>, StoreError>>;
}

// ==============================================================================
// SQLite
// ==============================================================================

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub async fn init_db(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            email TEXT,
            name TEXT,
            city TEXT,
            score REAL,
            streak INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;
    info!("🗃️ 'users' table is ready.");
    Ok(())
}

fn row_to_user(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    let streak: Option<i64> = row.try_get("streak")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        city: row.try_get("city")?,
        score: row.try_get("score")?,
        streak: streak.map(|s| s.clamp(0, u32::MAX as i64) as u32),
    })
}

impl UserStore for SqliteUserStore {
    fn find_users_by_locality<'a>(
        &'a self,
        filter: &'a LocalityFilter,
    ) -> BoxFuture<'a, Result<Vec<UserRecord>, StoreError>> {
        Box::pin(async move {
            // SQLite 的 lower()/trim() 只处理 ASCII 和空格，城市匹配放在这边做
            let rows = sqlx::query("SELECT id, email, name, city, score, streak FROM users")
                .fetch_all(&self.pool)
                .await?;
            let mut users = Vec::with_capacity(rows.len());
            for row in &rows {
                let user = row_to_user(row)?;
                if filter.matches(user.city.as_deref()) {
                    users.push(user);
                }
            }
            Ok(users)
        })
    }
}

// ==============================================================================
// In-memory
// ==============================================================================

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<UserRecord>>,
}

impl MemoryUserStore {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn insert(&self, user: UserRecord) {
        if let Ok(mut users) = self.users.write() {
            users.push(user);
        }
    }
}

impl UserStore for MemoryUserStore {
    fn find_users_by_locality<'a>(
        &'a self,
        filter: &'a LocalityFilter,
    ) -> BoxFuture<'a, Result<Vec<UserRecord>, StoreError>> {
        let result = self
            .users
            .read()
            .map(|users| {
                users
                    .iter()
                    .filter(|u| filter.matches(u.city.as_deref()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    fn user(id: &str, name: &str, city: &str) -> UserRecord {
        UserRecord {
            id: id.into(),
            email: Some(format!("{}@example.com", id)),
            name: Some(name.into()),
            city: Some(city.into()),
            ..Default::default()
        }
    }

    async fn memory_pool() -> SqlitePool {
        // 单连接，保证所有查询落在同一个内存库上
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    #[test]
    fn city_filter_is_case_and_whitespace_insensitive() {
        let filter = LocalityFilter::City("mumbai".into());
        assert!(filter.matches(Some(" Mumbai ")));
        assert!(filter.matches(Some("MUMBAI")));
        assert!(!filter.matches(Some("Pune")));
        assert!(!filter.matches(None));
        assert!(LocalityFilter::All.matches(None));
    }

    #[tokio::test]
    async fn memory_store_filters_by_city() {
        let store = MemoryUserStore::new(vec![user("a", "Asha", "Mumbai"), user("b", "Bo", "Pune")]);
        store.insert(user("c", "Cy", "mumbai "));

        let mumbai = store
            .find_users_by_locality(&LocalityFilter::City("mumbai".into()))
            .await
            .unwrap();
        let ids: Vec<_> = mumbai.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let all = store.find_users_by_locality(&LocalityFilter::All).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn sqlite_store_matches_normalized_city() {
        let pool = memory_pool().await;
        for (id, name, city) in [("1", "Asha", " Mumbai"), ("2", "Bo", "PUNE"), ("3", "Cy", "mumbai")] {
            sqlx::query("INSERT INTO users (id, email, name, city) VALUES (?, ?, ?, ?)")
                .bind(id)
                .bind(format!("{}@example.com", name.to_lowercase()))
                .bind(name)
                .bind(city)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query("UPDATE users SET score = 12.5, streak = 4 WHERE id = '3'")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqliteUserStore::new(pool);
        let mut mumbai = store
            .find_users_by_locality(&LocalityFilter::City("mumbai".into()))
            .await
            .unwrap();
        mumbai.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(mumbai.len(), 2);
        assert_eq!(mumbai[0].name.as_deref(), Some("Asha"));
        assert_eq!(mumbai[0].score, None);
        assert_eq!(mumbai[0].streak, Some(0));
        assert_eq!(mumbai[1].score, Some(12.5));
        assert_eq!(mumbai[1].streak, Some(4));

        let all = store.find_users_by_locality(&LocalityFilter::All).await.unwrap();
        assert_eq!(all.len(), 3);

        let none = store
            .find_users_by_locality(&LocalityFilter::City("delhi".into()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn both_stores_agree_on_unicode_and_tab_padded_cities() {
        let pool = memory_pool().await;
        let seeded = vec![
            user("1", "Ava", "ZÜRICH"),
            user("2", "Ben", "Mumbai\t"),
            user("3", "Cy", "Zürich"),
            user("4", "Dev", "\u{a0}Pune"),
        ];
        for u in &seeded {
            sqlx::query("INSERT INTO users (id, name, city) VALUES (?, ?, ?)")
                .bind(&u.id)
                .bind(&u.name)
                .bind(&u.city)
                .execute(&pool)
                .await
                .unwrap();
        }
        let sqlite = SqliteUserStore::new(pool);
        let memory = MemoryUserStore::new(seeded);

        for (city, expected) in [("zürich", vec!["1", "3"]), ("mumbai", vec!["2"]), ("pune", vec!["4"])] {
            let filter = LocalityFilter::City(city.into());
            for found in [
                sqlite.find_users_by_locality(&filter).await.unwrap(),
                memory.find_users_by_locality(&filter).await.unwrap(),
            ] {
                let mut ids: Vec<_> = found.iter().map(|u| u.id.as_str()).collect();
                ids.sort();
                assert_eq!(ids, expected, "city {}", city);
            }
        }
    }
}
