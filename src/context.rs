/// Application context and dependency injection
use crate::{
    account::AccountManager,
    auth::TokenService,
    avatar::AvatarStore,
    config::ServerConfig,
    db::{self, SqliteAccountStore, SqliteActivityStore},
    error::ApiResult,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub tokens: Arc<TokenService>,
    pub account_manager: Arc<AccountManager>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create upload directory if it doesn't exist
        tokio::fs::create_dir_all(&config.storage.upload_directory).await?;

        // Initialize database
        let db = db::create_pool(
            &config.database.path,
            db::DatabaseOptions {
                max_connections: config.database.max_connections,
                ..Default::default()
            },
        )
        .await?;

        // Run migrations
        db::run_migrations(&db).await?;

        // Test connection
        db::test_connection(&db).await?;

        tracing::info!("Database ready at {}", config.database.path.display());

        Ok(Self::with_pool(config, db))
    }

    /// Wire services around an existing pool. Migrations must already be applied.
    pub fn with_pool(config: ServerConfig, db: SqlitePool) -> Self {
        let tokens = Arc::new(TokenService::new(&config.authentication));
        let avatars = Arc::new(AvatarStore::new(
            config.storage.upload_directory.clone(),
            config.storage.avatar_upload_limit,
        ));

        let account_manager = Arc::new(AccountManager::new(
            Arc::new(SqliteAccountStore::new(db.clone())),
            Arc::new(SqliteActivityStore::new(db.clone())),
            tokens.clone(),
            avatars,
            Arc::new(config.authentication.clone()),
        ));

        Self {
            config: Arc::new(config),
            db,
            tokens,
            account_manager,
        }
    }
}
