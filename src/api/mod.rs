/// API routes and handlers
pub mod auth;
pub mod logs;
pub mod middleware;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(logs::routes())
}
