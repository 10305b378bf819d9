/// Registration and session endpoints
use crate::{
    account::{
        LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RefreshResponse,
        RegisterRequest, RegisterResponse,
    },
    auth::AuthContext,
    context::AppContext,
    error::ApiResult,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use validator::Validate;

/// Build session routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// Create account endpoint
async fn register(
    State(ctx): State<AppContext>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(req) = payload?;
    tracing::info!("register: Creating account for username: {}", req.username);

    let account = ctx.account_manager.register(req).await.map_err(|e| {
        tracing::debug!("register: Failed: {}", e);
        e
    })?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            id: account.id,
        }),
    ))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(mut req) = payload?;
    req.email = req.email.trim().to_string();
    req.validate()?;

    let outcome = ctx.account_manager.login(&req.email, &req.password).await?;

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        role: outcome.account.role,
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
    }))
}

/// Exchange a refresh token for a new access token
async fn refresh(
    State(ctx): State<AppContext>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<RefreshResponse>> {
    let Json(req) = payload?;
    let response = ctx.account_manager.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

/// Revoke the caller's refresh token
async fn logout(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ApiResult<Json<MessageResponse>> {
    ctx.account_manager.logout(&auth.caller()).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}
