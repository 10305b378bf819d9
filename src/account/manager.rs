/// Account manager: registration, session lifecycle and account operations
///
/// Every operation on an existing account takes the authenticated [`Caller`]
/// and passes through [`authorize`] before touching storage, whichever
/// transport invoked it.
use crate::{
    account::{
        AccountPage, ActivityParams, ListAccountsParams, LoginOutcome, RefreshResponse,
        RegisterRequest, UpdateProfileRequest,
    },
    auth::{authorize, Action, Caller, PasswordHasher, Role, Target, TokenService},
    avatar::AvatarStore,
    config::AuthConfig,
    db::{
        Account, AccountListQuery, AccountState, AccountStore, ActivityFilter, ActivityLogEntry,
        ActivityStore, NewAccount, ProfileChanges,
    },
    error::{ApiError, ApiResult},
};
use std::sync::{Arc, OnceLock};
use validator::Validate;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_ACTIVITY_ENTRIES: i64 = 1000;

/// Account manager service
pub struct AccountManager {
    store: Arc<dyn AccountStore>,
    activity: Arc<dyn ActivityStore>,
    tokens: Arc<TokenService>,
    avatars: Arc<AvatarStore>,
    config: Arc<AuthConfig>,
    /// Digest verified against when no account matches a login
    dummy_digest: OnceLock<String>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        store: Arc<dyn AccountStore>,
        activity: Arc<dyn ActivityStore>,
        tokens: Arc<TokenService>,
        avatars: Arc<AvatarStore>,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            store,
            activity,
            tokens,
            avatars,
            config,
            dummy_digest: OnceLock::new(),
        }
    }

    /// Create a new account.
    ///
    /// The role is `admin` only for emails on the configured admin list.
    pub async fn register(&self, mut req: RegisterRequest) -> ApiResult<Account> {
        req.username = req.username.trim().to_string();
        req.email = req.email.trim().to_lowercase();
        req.validate()?;

        let email = req.email;
        let role = if self.config.is_admin_email(&email) {
            Role::Admin
        } else {
            Role::User
        };

        let password_hash = PasswordHasher::hash(&req.password)?;

        let account = self
            .store
            .insert(NewAccount {
                username: req.username,
                email,
                password_hash,
                role,
            })
            .await?;

        tracing::info!(account_id = account.id, role = %account.role, "Account registered");
        self.record(account.id, "register", "Account created").await;

        Ok(account)
    }

    /// Authenticate by email and password and issue a token pair.
    ///
    /// The new refresh token overwrites the stored one, which ends every other
    /// session of this account. Unknown, soft-deleted and wrong-password
    /// attempts all run one Argon2 verification and fail the same way.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<LoginOutcome> {
        let email = email.trim().to_lowercase();

        let account = match self.store.find_active_by_email(&email).await? {
            Some(account) => account,
            None => {
                self.verify_against_dummy(password);
                tracing::info!("Login rejected: no active account for email");
                return Err(ApiError::InvalidCredentials);
            }
        };

        if !PasswordHasher::verify(password, &account.password_hash) {
            tracing::info!(account_id = account.id, "Login rejected: wrong password");
            return Err(ApiError::InvalidCredentials);
        }

        let access_token = self.tokens.mint_access(
            account.id,
            &account.username,
            account.role,
            self.tokens.access_ttl(),
        )?;
        let refresh_token = self
            .tokens
            .mint_refresh(account.id, self.tokens.refresh_ttl())?;

        self.store
            .set_refresh_token(account.id, Some(&refresh_token))
            .await?;

        tracing::info!(account_id = account.id, "Login succeeded");
        self.record(account.id, "login", "Logged in successfully").await;

        Ok(LoginOutcome {
            account,
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The presented token must verify and must equal the value stored on its
    /// account. With rotation enabled the stored value is swapped atomically,
    /// so of two concurrent refreshes with the same token only one succeeds.
    pub async fn refresh(&self, presented: &str) -> ApiResult<RefreshResponse> {
        let claims = self.tokens.validate_refresh(presented)?;

        let account = self
            .store
            .find_active_by_id(claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Refresh token not recognized".to_string()))?;

        if account.refresh_token.as_deref() != Some(presented) {
            tracing::warn!(account_id = account.id, "Refresh token does not match stored value");
            return Err(ApiError::Unauthorized(
                "Refresh token not recognized".to_string(),
            ));
        }

        let access_token = self.tokens.mint_access(
            account.id,
            &account.username,
            account.role,
            self.tokens.access_ttl(),
        )?;

        let refresh_token = if self.config.rotate_refresh_tokens {
            let replacement = self
                .tokens
                .mint_refresh(account.id, self.tokens.refresh_ttl())?;
            let swapped = self
                .store
                .swap_refresh_token(account.id, presented, Some(&replacement))
                .await?;
            if !swapped {
                tracing::warn!(account_id = account.id, "Lost refresh token race");
                return Err(ApiError::Unauthorized(
                    "Refresh token not recognized".to_string(),
                ));
            }
            Some(replacement)
        } else {
            None
        };

        tracing::debug!(account_id = account.id, rotated = refresh_token.is_some(), "Token refreshed");

        Ok(RefreshResponse {
            access_token,
            refresh_token,
        })
    }

    /// Clear the caller's refresh token.
    ///
    /// Access tokens already issued stay valid until they expire.
    pub async fn logout(&self, caller: &Caller) -> ApiResult<()> {
        self.store.set_refresh_token(caller.id, None).await?;

        tracing::info!(account_id = caller.id, "Logged out");
        self.record(caller.id, "logout", "Refresh token revoked").await;

        Ok(())
    }

    /// Fetch an active account
    pub async fn get_account(&self, caller: &Caller, id: i64) -> ApiResult<Account> {
        authorize(caller, &Target::account(id), Action::ReadProfile)?;

        self.store
            .find_active_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))
    }

    /// Apply a partial profile update.
    ///
    /// Missing and blank fields are left unchanged.
    pub async fn update_profile(
        &self,
        caller: &Caller,
        id: i64,
        req: UpdateProfileRequest,
    ) -> ApiResult<Account> {
        authorize(caller, &Target::account(id), Action::UpdateProfile)?;

        let req = UpdateProfileRequest {
            username: non_blank(req.username),
            email: non_blank(req.email).map(|e| e.to_lowercase()),
            password: req.password.filter(|p| !p.is_empty()),
        };
        req.validate()?;

        let password_hash = match req.password.as_deref() {
            Some(password) => Some(PasswordHasher::hash(password)?),
            None => None,
        };
        let changes = ProfileChanges {
            username: req.username,
            email: req.email,
            password_hash,
        };

        if changes.is_empty() {
            return self.get_account(caller, id).await;
        }

        let mut fields = Vec::new();
        if changes.username.is_some() {
            fields.push("username");
        }
        if changes.email.is_some() {
            fields.push("email");
        }
        if changes.password_hash.is_some() {
            fields.push("password");
        }

        let account = self
            .store
            .update_profile(id, changes)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

        tracing::info!(account_id = id, by = caller.id, ?fields, "Profile updated");
        self.record(id, "update_profile", &format!("Updated {}", fields.join(", ")))
            .await;

        Ok(account)
    }

    /// Soft-delete an account. Its refresh token is revoked too.
    pub async fn soft_delete(&self, caller: &Caller, id: i64) -> ApiResult<()> {
        authorize(caller, &Target::account(id), Action::SoftDelete)?;

        if !self.store.soft_delete(id).await? {
            return Err(ApiError::NotFound("Account not found".to_string()));
        }

        let details = if caller.id == id {
            "Account deleted by its owner".to_string()
        } else {
            format!("Account deleted by admin {}", caller.id)
        };
        tracing::info!(account_id = id, by = caller.id, "Account soft-deleted");
        self.record(id, "delete_account", &details).await;

        Ok(())
    }

    /// Undo a soft delete
    pub async fn restore(&self, caller: &Caller, id: i64) -> ApiResult<Account> {
        authorize(caller, &Target::account(id), Action::Restore)?;

        let account = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

        if account.state == AccountState::Active {
            return Err(ApiError::Conflict("Account is not deleted".to_string()));
        }

        if !self.store.restore(id).await? {
            // Restored concurrently
            return Err(ApiError::Conflict("Account is not deleted".to_string()));
        }

        tracing::info!(account_id = id, by = caller.id, "Account restored");
        self.record(id, "restore_account", &format!("Account restored by admin {}", caller.id))
            .await;

        self.store
            .find_active_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))
    }

    /// Permanently remove an account and its avatar file
    pub async fn hard_delete(&self, caller: &Caller, id: i64) -> ApiResult<()> {
        authorize(caller, &Target::account(id), Action::HardDelete)?;

        let account = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

        if !self.store.hard_delete(id).await? {
            return Err(ApiError::NotFound("Account not found".to_string()));
        }

        if let Some(avatar) = account.avatar.as_deref() {
            if let Err(e) = self.avatars.remove(avatar).await {
                tracing::warn!(account_id = id, "Failed to remove avatar file: {}", e);
            }
        }

        tracing::info!(account_id = id, by = caller.id, "Account permanently deleted");
        self.record(
            id,
            "hard_delete_account",
            &format!("Account permanently deleted by admin {}", caller.id),
        )
        .await;

        Ok(())
    }

    /// Change an account's role. Takes effect on the next issued access token.
    pub async fn change_role(&self, caller: &Caller, id: i64, role: Role) -> ApiResult<Account> {
        authorize(caller, &Target::account(id), Action::ChangeRole)?;

        let account = self
            .store
            .set_role(id, role)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

        tracing::info!(account_id = id, by = caller.id, role = %role, "Role changed");
        self.record(id, "change_role", &format!("Role set to {} by admin {}", role, caller.id))
            .await;

        Ok(account)
    }

    /// List accounts with pagination and optional search
    pub async fn list_accounts(
        &self,
        caller: &Caller,
        params: ListAccountsParams,
    ) -> ApiResult<AccountPage> {
        authorize(caller, &Target::all_accounts(), Action::ListAccounts)?;

        let page = parse_positive(params.page.as_deref()).unwrap_or(1);
        let limit = parse_positive(params.limit.as_deref())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        let search = params
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let query = AccountListQuery {
            search,
            include_deleted: params.include_deleted.unwrap_or(false),
            limit,
            offset: (page - 1).saturating_mul(limit),
        };

        let (accounts, total) = self.store.list(&query).await?;

        Ok(AccountPage {
            data: accounts.into_iter().map(Into::into).collect(),
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        })
    }

    /// Replace the caller's avatar with an uploaded file
    pub async fn update_avatar(
        &self,
        caller: &Caller,
        file_name: &str,
        data: &[u8],
    ) -> ApiResult<String> {
        authorize(caller, &Target::account(caller.id), Action::UpdateAvatar)?;

        let account = self
            .store
            .find_active_by_id(caller.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

        let url = self.avatars.save(account.id, file_name, data).await?;

        if !self.store.set_avatar(account.id, &url).await? {
            // Deleted between the lookup and the write
            self.avatars.remove(&url).await?;
            return Err(ApiError::NotFound("Account not found".to_string()));
        }

        if let Some(old) = account.avatar.as_deref() {
            if let Err(e) = self.avatars.remove(old).await {
                tracing::warn!(account_id = account.id, "Failed to remove old avatar: {}", e);
            }
        }

        tracing::info!(account_id = account.id, url = %url, "Avatar updated");
        self.record(account.id, "update_avatar", "Avatar updated by the user")
            .await;

        Ok(url)
    }

    /// Read the activity log.
    ///
    /// Without a `user_id` admins get every entry and other callers get their
    /// own. With one, the policy decides.
    pub async fn list_activity(
        &self,
        caller: &Caller,
        params: ActivityParams,
    ) -> ApiResult<Vec<ActivityLogEntry>> {
        let user_id = match params.user_id {
            Some(id) => {
                authorize(caller, &Target::account(id), Action::ReadActivityLog)?;
                Some(id)
            }
            None if caller.role == Role::Admin => {
                authorize(caller, &Target::all_accounts(), Action::ReadActivityLog)?;
                None
            }
            None => {
                authorize(caller, &Target::account(caller.id), Action::ReadActivityLog)?;
                Some(caller.id)
            }
        };

        self.activity
            .list(ActivityFilter {
                user_id,
                limit: params.limit.map(|l| l.clamp(1, MAX_ACTIVITY_ENTRIES)),
            })
            .await
    }

    fn verify_against_dummy(&self, password: &str) {
        let digest = self
            .dummy_digest
            .get_or_init(|| PasswordHasher::hash("authgate-no-such-account").unwrap_or_default());
        PasswordHasher::verify(password, digest);
    }

    /// Append to the audit trail. Failures are logged, never returned.
    async fn record(&self, user_id: i64, action: &str, details: &str) {
        if let Err(e) = self.activity.append(user_id, action, details).await {
            tracing::warn!(user_id, action, "Failed to write activity log: {}", e);
        }
    }
}

/// Trimmed value, or `None` when absent or blank
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive(value: Option<&str>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 1)
}
