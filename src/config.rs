/// Configuration management for authgate
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub authentication: AuthConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    /// Access token lifetime in seconds
    pub access_token_ttl: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl: i64,
    /// Issue a fresh refresh token on every refresh call
    pub rotate_refresh_tokens: bool,
    /// Emails that are granted the admin role at registration
    pub admin_emails: Vec<String>,
}

// The secret must never reach the logs, so Debug is written by hand.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("admin_emails", &self.admin_emails)
            .finish()
    }
}

/// File storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_directory: PathBuf,
    pub avatar_upload_limit: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("AUTH_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("AUTH_PORT")
            .or_else(|_| env::var("PORT"))
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| ApiError::Validation("Invalid port number".to_string()))?;

        let database_path = env::var("AUTH_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/accounts.sqlite"));
        let max_connections = env_setting("AUTH_DB_MAX_CONNECTIONS", 10)?;

        let jwt_secret = env::var("AUTH_JWT_SECRET")
            .map_err(|_| ApiError::Validation("JWT secret required".to_string()))?;
        let issuer = env::var("AUTH_JWT_ISSUER").unwrap_or_else(|_| "authgate".to_string());
        let access_token_ttl = env_setting("AUTH_ACCESS_TOKEN_TTL", 900)?;
        let refresh_token_ttl = env_setting("AUTH_REFRESH_TOKEN_TTL", 604800)?;
        let rotate_refresh_tokens = env_setting("AUTH_ROTATE_REFRESH_TOKENS", false)?;

        // Parse admin emails from comma-separated list
        let admin_emails = env::var("AUTH_ADMIN_EMAILS")
            .unwrap_or_else(|_| String::new())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let upload_directory = env::var("AUTH_UPLOAD_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));
        let avatar_upload_limit = env_setting("AUTH_AVATAR_UPLOAD_LIMIT", 5242880)?;

        let log_level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "authgate=debug,tower_http=debug".to_string());

        Ok(ServerConfig {
            service: ServiceConfig { hostname, port },
            database: DatabaseConfig {
                path: database_path,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                issuer,
                access_token_ttl,
                refresh_token_ttl,
                rotate_refresh_tokens,
                admin_emails,
            },
            storage: StorageConfig {
                upload_directory,
                avatar_upload_limit,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(ApiError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.access_token_ttl <= 0 || self.authentication.refresh_token_ttl <= 0 {
            return Err(ApiError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ApiError::Validation(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read a typed setting, falling back to `default` only when the variable is unset
fn env_setting<T: FromStr>(name: &str, default: T) -> ApiResult<T> {
    parse_setting(name, env::var(name).ok(), default)
}

fn parse_setting<T: FromStr>(name: &str, raw: Option<String>, default: T) -> ApiResult<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ApiError::Validation(format!("Invalid value for {}: {:?}", name, value))),
        None => Ok(default),
    }
}

impl AuthConfig {
    /// Whether an email is on the configured admin list
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}
