//! Template CRUD routes. Template ids are the `type#channel` string, URL
//! encoded in paths.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use herald_common::error::AppError;
use herald_common::types::Template;
use herald_engine::templates::{CreateTemplatePayload, TemplateService, UpdateTemplatePayload};

use super::{ListQuery, list_body, message_body};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/v1/templates/{template_id}",
            get(get_template)
                .put(update_template)
                .delete(delete_template),
        )
}

/// POST /api/v1/templates — Create a template.
async fn create_template(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<CreateTemplatePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let Json(payload) = payload?;
    let template = TemplateService::create(&state.store, &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /api/v1/templates?context= — Templates of one context.
async fn list_templates(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let page =
        TemplateService::list(&state.store, &actor, query.context(), &query.page()?).await?;
    list_body(page)
}

/// GET /api/v1/templates/{template_id}?context=
async fn get_template(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(template_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Template>, AppError> {
    let template =
        TemplateService::get(&state.store, &actor, query.context(), &template_id).await?;
    Ok(Json(template))
}

/// PUT /api/v1/templates/{template_id} — Replace the content.
async fn update_template(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(template_id): Path<String>,
    payload: Result<Json<UpdateTemplatePayload>, JsonRejection>,
) -> Result<Json<Template>, AppError> {
    let Json(payload) = payload?;
    let template = TemplateService::update(&state.store, &actor, &template_id, payload).await?;
    Ok(Json(template))
}

/// DELETE /api/v1/templates/{template_id}?context=
async fn delete_template(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(template_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    TemplateService::delete(&state.store, &actor, query.context(), &template_id).await?;
    Ok(message_body(format!("Template {template_id} deleted")))
}
