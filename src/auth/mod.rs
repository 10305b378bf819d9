/// Authentication extractors and utilities
pub mod password;
pub mod policy;
pub mod token;

pub use password::PasswordHasher;
pub use policy::{authorize, can_access, Action, Caller, Role, Target};
pub use token::{AccessClaims, RefreshClaims, TokenError, TokenService};

use crate::{api::middleware::extract_bearer_token, context::AppContext, error::ApiError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - extracts and validates the access token from a request
///
/// Validation is stateless: signature, algorithm, issuer and expiry only.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: AccessClaims,
}

impl AuthContext {
    pub fn caller(&self) -> Caller {
        Caller {
            id: self.claims.sub,
            role: self.claims.role,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

        let claims = state.tokens.validate_access(&token)?;

        tracing::debug!(account_id = claims.sub, role = %claims.role, "Authenticated request");

        Ok(AuthContext { claims })
    }
}
