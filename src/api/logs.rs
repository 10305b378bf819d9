/// Activity log endpoint
use crate::{
    account::ActivityParams, auth::AuthContext, context::AppContext, db::ActivityLogEntry,
    error::ApiResult,
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/logs", get(list_logs))
}

async fn list_logs(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    params: Result<Query<ActivityParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ActivityLogEntry>>> {
    let Query(params) = params?;
    let entries = ctx
        .account_manager
        .list_activity(&auth.caller(), params)
        .await?;
    Ok(Json(entries))
}
