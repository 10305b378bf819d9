/// Account database models and operations
use crate::{
    auth::Role,
    db::is_unique_violation,
    error::{ApiError, ApiResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Lifecycle state of a stored account.
///
/// Hard-deleted accounts have no row and therefore no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountState {
    Active,
    SoftDeleted { deleted_at: DateTime<Utc> },
}

impl AccountState {
    fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(deleted_at) => AccountState::SoftDeleted { deleted_at },
            None => AccountState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountState::Active)
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AccountState::Active => None,
            AccountState::SoftDeleted { deleted_at } => Some(*deleted_at),
        }
    }
}

/// Account record in the database
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub refresh_token: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: AccountState,
}

/// Values for a new account row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.password_hash.is_none()
    }
}

/// Paginated account listing
#[derive(Debug, Clone)]
pub struct AccountListQuery {
    /// Case-insensitive substring of username or email
    pub search: Option<String>,
    pub include_deleted: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Durable account storage
///
/// Lookups named `*_active_*` never return soft-deleted rows.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert an account. Duplicate username or email is a `Conflict`.
    async fn insert(&self, account: NewAccount) -> ApiResult<Account>;

    /// Find an account in any state
    async fn find_by_id(&self, id: i64) -> ApiResult<Option<Account>>;

    async fn find_active_by_id(&self, id: i64) -> ApiResult<Option<Account>>;

    async fn find_active_by_email(&self, email: &str) -> ApiResult<Option<Account>>;

    /// Apply a partial update to an active account.
    /// Returns the updated account, or `None` when no active row matched.
    async fn update_profile(&self, id: i64, changes: ProfileChanges) -> ApiResult<Option<Account>>;

    /// Overwrite the refresh token slot unconditionally
    async fn set_refresh_token(&self, id: i64, token: Option<&str>) -> ApiResult<bool>;

    /// Replace the refresh token only if it still equals `expected`.
    /// Returns false when another writer got there first.
    async fn swap_refresh_token(
        &self,
        id: i64,
        expected: &str,
        replacement: Option<&str>,
    ) -> ApiResult<bool>;

    async fn set_role(&self, id: i64, role: Role) -> ApiResult<Option<Account>>;

    async fn set_avatar(&self, id: i64, avatar: &str) -> ApiResult<bool>;

    /// Mark an active account deleted and clear its refresh token
    async fn soft_delete(&self, id: i64) -> ApiResult<bool>;

    /// Clear the soft-delete mark
    async fn restore(&self, id: i64) -> ApiResult<bool>;

    /// Remove the row permanently
    async fn hard_delete(&self, id: i64) -> ApiResult<bool>;

    /// Page through accounts ordered by id; also returns the total match count
    async fn list(&self, query: &AccountListQuery) -> ApiResult<(Vec<Account>, i64)>;
}

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, role, refresh_token, avatar,
     created_at, updated_at, deleted_at";

fn account_from_row(row: &SqliteRow) -> ApiResult<Account> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse()
        .map_err(|_| ApiError::Internal(format!("Unknown role stored in database: {}", role)))?;

    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
        refresh_token: row.try_get("refresh_token")?,
        avatar: row.try_get("avatar")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        state: AccountState::from_deleted_at(row.try_get("deleted_at")?),
    })
}

fn map_unique(err: sqlx::Error) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::Conflict("Username or email already registered".to_string())
    } else {
        ApiError::Database(err)
    }
}

/// Escape LIKE wildcards in user input
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// SQLite-backed account store
#[derive(Clone)]
pub struct SqliteAccountStore {
    db: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(&self, clause: &str, bind: BindValue<'_>) -> ApiResult<Option<Account>> {
        let sql = format!("SELECT {} FROM account WHERE {}", ACCOUNT_COLUMNS, clause);
        let query = sqlx::query(&sql);
        let query = match bind {
            BindValue::Id(id) => query.bind(id),
            BindValue::Text(text) => query.bind(text),
        };

        let row = query.fetch_optional(&self.db).await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

enum BindValue<'a> {
    Id(i64),
    Text(&'a str),
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn insert(&self, account: NewAccount) -> ApiResult<Account> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO account (username, email, password_hash, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(map_unique)?;

        Ok(Account {
            id: result.last_insert_rowid(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            refresh_token: None,
            avatar: None,
            created_at: now,
            updated_at: now,
            state: AccountState::Active,
        })
    }

    async fn find_by_id(&self, id: i64) -> ApiResult<Option<Account>> {
        self.fetch_one_where("id = ?1", BindValue::Id(id)).await
    }

    async fn find_active_by_id(&self, id: i64) -> ApiResult<Option<Account>> {
        self.fetch_one_where("id = ?1 AND deleted_at IS NULL", BindValue::Id(id))
            .await
    }

    async fn find_active_by_email(&self, email: &str) -> ApiResult<Option<Account>> {
        self.fetch_one_where("email = ?1 AND deleted_at IS NULL", BindValue::Text(email))
            .await
    }

    async fn update_profile(&self, id: i64, changes: ProfileChanges) -> ApiResult<Option<Account>> {
        let result = sqlx::query(
            "UPDATE account
             SET username = COALESCE(?1, username),
                 email = COALESCE(?2, email),
                 password_hash = COALESCE(?3, password_hash),
                 updated_at = ?4
             WHERE id = ?5 AND deleted_at IS NULL",
        )
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(map_unique)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_active_by_id(id).await
    }

    async fn set_refresh_token(&self, id: i64, token: Option<&str>) -> ApiResult<bool> {
        let result = sqlx::query("UPDATE account SET refresh_token = ?1 WHERE id = ?2")
            .bind(token)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn swap_refresh_token(
        &self,
        id: i64,
        expected: &str,
        replacement: Option<&str>,
    ) -> ApiResult<bool> {
        // Single statement, so the compare and the write are atomic
        let result = sqlx::query(
            "UPDATE account SET refresh_token = ?1
             WHERE id = ?2 AND refresh_token = ?3 AND deleted_at IS NULL",
        )
        .bind(replacement)
        .bind(id)
        .bind(expected)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_role(&self, id: i64, role: Role) -> ApiResult<Option<Account>> {
        let result = sqlx::query(
            "UPDATE account SET role = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(role.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_active_by_id(id).await
    }

    async fn set_avatar(&self, id: i64, avatar: &str) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET avatar = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(avatar)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete(&self, id: i64) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET deleted_at = ?1, refresh_token = NULL
             WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn restore(&self, id: i64) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET deleted_at = NULL, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NOT NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete(&self, id: i64) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM account WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &AccountListQuery) -> ApiResult<(Vec<Account>, i64)> {
        let pattern = query.search.as_deref().map(like_pattern);
        let filter = "(?1 OR deleted_at IS NULL)
             AND (?2 IS NULL OR username LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\')";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM account WHERE {}", filter))
            .bind(query.include_deleted)
            .bind(&pattern)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM account WHERE {} ORDER BY id LIMIT ?3 OFFSET ?4",
            ACCOUNT_COLUMNS, filter
        ))
        .bind(query.include_deleted)
        .bind(&pattern)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.db)
        .await?;

        let accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<ApiResult<Vec<_>>>()?;

        Ok((accounts, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn store() -> SqliteAccountStore {
        SqliteAccountStore::new(create_memory_pool().await.unwrap())
    }

    fn new_account(name: &str) -> NewAccount {
        NewAccount {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: "$argon2id$fake".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = store().await;
        let created = store.insert(new_account("alice")).await.unwrap();

        let found = store.find_active_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.role, Role::User);
        assert_eq!(found.state, AccountState::Active);
        assert!(found.refresh_token.is_none());

        let by_email = store
            .find_active_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_username_or_email_conflicts() {
        let store = store().await;
        store.insert(new_account("alice")).await.unwrap();

        let dup_name = NewAccount {
            email: "other@example.com".to_string(),
            ..new_account("alice")
        };
        assert!(matches!(store.insert(dup_name).await, Err(ApiError::Conflict(_))));

        let dup_email = NewAccount {
            username: "alice2".to_string(),
            ..new_account("alice")
        };
        assert!(matches!(store.insert(dup_email).await, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_account_until_restore() {
        let store = store().await;
        let account = store.insert(new_account("bob")).await.unwrap();
        store.set_refresh_token(account.id, Some("token")).await.unwrap();

        assert!(store.soft_delete(account.id).await.unwrap());
        assert!(!store.soft_delete(account.id).await.unwrap());

        assert!(store.find_active_by_id(account.id).await.unwrap().is_none());
        assert!(store
            .find_active_by_email("bob@example.com")
            .await
            .unwrap()
            .is_none());

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert!(!stored.state.is_active());
        assert!(stored.state.deleted_at().is_some());
        assert!(stored.refresh_token.is_none());

        assert!(store.restore(account.id).await.unwrap());
        assert!(!store.restore(account.id).await.unwrap());
        assert!(store.find_active_by_id(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hard_delete_is_permanent() {
        let store = store().await;
        let account = store.insert(new_account("carol")).await.unwrap();

        assert!(store.hard_delete(account.id).await.unwrap());
        assert!(store.find_by_id(account.id).await.unwrap().is_none());
        assert!(!store.restore(account.id).await.unwrap());
        assert!(!store.hard_delete(account.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_swap_refresh_token_requires_current_value() {
        let store = store().await;
        let account = store.insert(new_account("dave")).await.unwrap();
        store.set_refresh_token(account.id, Some("first")).await.unwrap();

        assert!(!store
            .swap_refresh_token(account.id, "stale", Some("second"))
            .await
            .unwrap());
        assert!(store
            .swap_refresh_token(account.id, "first", Some("second"))
            .await
            .unwrap());
        // The old value no longer matches
        assert!(!store
            .swap_refresh_token(account.id, "first", Some("third"))
            .await
            .unwrap());

        let stored = store.find_active_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_update_profile_is_partial() {
        let store = store().await;
        let account = store.insert(new_account("erin")).await.unwrap();
        store.insert(new_account("frank")).await.unwrap();

        let updated = store
            .update_profile(
                account.id,
                ProfileChanges {
                    username: Some("erin2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.username, "erin2");
        assert_eq!(updated.email, "erin@example.com");

        let clash = store
            .update_profile(
                account.id,
                ProfileChanges {
                    email: Some("frank@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(clash, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_list_search_and_pagination() {
        let store = store().await;
        for name in ["alice", "alicia", "bob", "carol"] {
            store.insert(new_account(name)).await.unwrap();
        }
        let deleted = store.insert(new_account("alina")).await.unwrap();
        store.soft_delete(deleted.id).await.unwrap();

        let (page, total) = store
            .list(&AccountListQuery {
                search: Some("ALI".to_string()),
                include_deleted: false,
                limit: 1,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].username, "alice");

        let (_, total) = store
            .list(&AccountListQuery {
                search: Some("ali".to_string()),
                include_deleted: true,
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(total, 3);

        let (all, total) = store
            .list(&AccountListQuery {
                search: None,
                include_deleted: false,
                limit: 10,
                offset: 2,
            })
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a%b_c"), "%a\\%b\\_c%");
    }
}
