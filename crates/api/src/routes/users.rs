//! User routes. Read-only; records are created at account provisioning.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use herald_common::error::AppError;
use herald_common::types::User;
use herald_engine::users::UserService;

use super::{ListQuery, list_body};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/users", get(list_users))
        .route("/api/v1/users/{user_id}", get(get_user))
}

/// GET /api/v1/users — Every user (admin only).
async fn list_users(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let page = UserService::list(&state.store, &actor, &query.page()?).await?;
    list_body(page)
}

/// GET /api/v1/users/{user_id} — One user.
async fn get_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = UserService::get(&state.store, &actor, &user_id).await?;
    Ok(Json(user))
}
