/// Activity log storage
use crate::error::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Activity log record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Which entries to read back
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityFilter {
    pub user_id: Option<i64>,
    pub limit: Option<i64>,
}

/// Append-only audit trail
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, user_id: i64, action: &str, details: &str) -> ApiResult<()>;

    /// Entries newest first
    async fn list(&self, filter: ActivityFilter) -> ApiResult<Vec<ActivityLogEntry>>;
}

/// SQLite-backed activity store
#[derive(Clone)]
pub struct SqliteActivityStore {
    db: SqlitePool,
}

impl SqliteActivityStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn append(&self, user_id: i64, action: &str, details: &str) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO activity_log (user_id, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(action)
        .bind(details)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn list(&self, filter: ActivityFilter) -> ApiResult<Vec<ActivityLogEntry>> {
        let entries = sqlx::query_as::<_, ActivityLogEntry>(
            "SELECT id, user_id, action, details, created_at
             FROM activity_log
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(filter.user_id)
        .bind(filter.limit.unwrap_or(-1))
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
