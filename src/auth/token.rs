/// Access and refresh token minting and validation
///
/// Access tokens are short lived and carry identity plus role. Refresh tokens
/// carry only the subject, an expiry and a random id; everything else is
/// re-read from storage when they are used, so role changes are never frozen
/// inside a week-long credential.
///
/// Both kinds are HS256 JWTs signed with the process-wide secret. Validation
/// is pinned to HS256 so a token announcing any other algorithm is rejected.
use crate::auth::policy::Role;
use crate::config::AuthConfig;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why a presented token was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Malformed token")]
    MalformedToken,

    /// Encoding failed on our side; not the caller's fault
    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Claims embedded in an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims embedded in a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i64,
    /// Makes every minted refresh token distinct, even within one second
    pub jti: String,
    pub exp: i64,
}

/// Stateless token service
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: Duration::seconds(config.access_token_ttl),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint an access token valid for `ttl` from now
    pub fn mint_access(
        &self,
        account_id: i64,
        username: &str,
        role: Role,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: account_id,
            username: username.to_string(),
            role,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        self.sign(&claims)
    }

    /// Mint a refresh token valid for `ttl` from now
    pub fn mint_refresh(&self, account_id: i64, ttl: Duration) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: account_id,
            jti: Uuid::new_v4().to_string(),
            exp: Utc::now().timestamp() + ttl.num_seconds(),
        };

        self.sign(&claims)
    }

    /// Validate an access token's signature, algorithm, issuer and expiry
    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = self.validation();
        validation.set_issuer(&[&self.issuer]);
        self.verify(token, &validation)
    }

    /// Validate a refresh token's signature, algorithm and expiry.
    ///
    /// This does not check the token against the stored slot; the session
    /// flow does that.
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify(token, &self.validation())
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation
    }

    fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<T, TokenError> {
        decode::<T>(token, &self.decoding_key, validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Token rejected: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        TokenError::InvalidSignature
                    }
                    _ => TokenError::MalformedToken,
                }
            })
    }
}
