/// Profile self-service and account administration endpoints
use crate::{
    account::{
        AccountPage, AvatarResponse, ChangeRoleRequest, ListAccountsParams, MessageResponse,
        UpdateProfileRequest, UpdateProfileResponse, UserEnvelope,
    },
    auth::AuthContext,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    routing::{delete, get, patch, post},
    Json, Router,
};

/// Multipart field carrying the avatar image
const AVATAR_FIELD: &str = "avatar";

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/me", get(me))
        .route("/users", get(list_users))
        .route("/users/avatar", post(upload_avatar))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/:id/hard", delete(hard_delete_user))
        .route("/users/:id/restore", patch(restore_user))
        .route("/users/:id/role", patch(change_role))
}

/// Profile of the authenticated caller
async fn me(State(ctx): State<AppContext>, auth: AuthContext) -> ApiResult<Json<UserEnvelope>> {
    let caller = auth.caller();
    let account = ctx.account_manager.get_account(&caller, caller.id).await?;
    Ok(Json(UserEnvelope {
        user: account.into(),
    }))
}

async fn get_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let Path(id) = id?;
    let account = ctx.account_manager.get_account(&auth.caller(), id).await?;
    Ok(Json(UserEnvelope {
        user: account.into(),
    }))
}

async fn update_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateProfileResponse>> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let account = ctx
        .account_manager
        .update_profile(&auth.caller(), id, req)
        .await?;

    Ok(Json(UpdateProfileResponse {
        message: "Profile updated successfully".to_string(),
        user: account.into(),
    }))
}

/// Soft delete
async fn delete_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;
    ctx.account_manager.soft_delete(&auth.caller(), id).await?;
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

async fn hard_delete_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;
    ctx.account_manager.hard_delete(&auth.caller(), id).await?;
    Ok(Json(MessageResponse::new("User permanently deleted")))
}

async fn restore_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<UpdateProfileResponse>> {
    let Path(id) = id?;
    let account = ctx.account_manager.restore(&auth.caller(), id).await?;
    Ok(Json(UpdateProfileResponse {
        message: "User restored successfully".to_string(),
        user: account.into(),
    }))
}

async fn change_role(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateProfileResponse>> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let account = ctx
        .account_manager
        .change_role(&auth.caller(), id, req.role)
        .await?;

    Ok(Json(UpdateProfileResponse {
        message: "Role updated successfully".to_string(),
        user: account.into(),
    }))
}

/// Admin listing with pagination and search
async fn list_users(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    params: Result<Query<ListAccountsParams>, QueryRejection>,
) -> ApiResult<Json<AccountPage>> {
    let Query(params) = params?;
    let page = ctx
        .account_manager
        .list_accounts(&auth.caller(), params)
        .await?;
    Ok(Json(page))
}

/// Replace the caller's avatar from a multipart upload
async fn upload_avatar(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<AvatarResponse>> {
    let mut multipart = multipart?;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(AVATAR_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Failed to read avatar upload: {}", e)))?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload
        .ok_or_else(|| ApiError::Validation("No avatar file uploaded".to_string()))?;

    tracing::debug!(bytes = data.len(), "upload_avatar: Received file {}", file_name);

    let url = ctx
        .account_manager
        .update_avatar(&auth.caller(), &file_name, &data)
        .await?;

    Ok(Json(AvatarResponse {
        message: "Avatar updated successfully".to_string(),
        avatar_url: url,
    }))
}
