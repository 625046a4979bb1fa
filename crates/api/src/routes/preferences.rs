//! Preference routes. `GET` with a `context` reads one record; without it,
//! lists every record (admin only).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use herald_common::error::AppError;
use herald_common::types::PreferenceRecord;
use herald_engine::preferences::{PreferenceService, PreferencesPayload};

use super::{ListQuery, list_body, message_body};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/v1/preferences",
        get(get_preferences)
            .post(create_preferences)
            .put(update_preferences)
            .delete(delete_preferences),
    )
}

async fn create_preferences(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<PreferencesPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<PreferenceRecord>), AppError> {
    let Json(payload) = payload?;
    let record = PreferenceService::create(&state.store, &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_preferences(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<PreferencesPayload>, JsonRejection>,
) -> Result<Json<PreferenceRecord>, AppError> {
    let Json(payload) = payload?;
    let record = PreferenceService::update(&state.store, &actor, payload).await?;
    Ok(Json(record))
}

async fn get_preferences(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    match &query.context {
        Some(context) => {
            let record = PreferenceService::get(&state.store, &actor, context).await?;
            Ok(Json(serde_json::to_value(record)?))
        }
        None => {
            let page = PreferenceService::list(&state.store, &actor, &query.page()?).await?;
            list_body(page)
        }
    }
}

async fn delete_preferences(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    PreferenceService::delete(&state.store, &actor, query.context()).await?;
    Ok(message_body("Preferences deleted"))
}
