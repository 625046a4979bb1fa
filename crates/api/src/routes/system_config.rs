//! System config routes, shaped like the preference routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use herald_common::error::AppError;
use herald_common::types::SystemConfigRecord;
use herald_engine::system_config::{SystemConfigPayload, SystemConfigService};

use super::{ListQuery, list_body, message_body};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/v1/config",
        get(get_config)
            .post(create_config)
            .put(update_config)
            .delete(delete_config),
    )
}

async fn create_config(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<SystemConfigPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<SystemConfigRecord>), AppError> {
    let Json(payload) = payload?;
    let record = SystemConfigService::create(&state.store, &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_config(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<SystemConfigPayload>, JsonRejection>,
) -> Result<Json<SystemConfigRecord>, AppError> {
    let Json(payload) = payload?;
    let record = SystemConfigService::update(&state.store, &actor, payload).await?;
    Ok(Json(record))
}

async fn get_config(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    match &query.context {
        Some(context) => {
            let record = SystemConfigService::get(&state.store, &actor, context).await?;
            Ok(Json(serde_json::to_value(record)?))
        }
        None => {
            let page = SystemConfigService::list(&state.store, &actor, &query.page()?).await?;
            list_body(page)
        }
    }
}

async fn delete_config(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    SystemConfigService::delete(&state.store, &actor, query.context()).await?;
    Ok(message_body("System config deleted"))
}
