//! Scheduled notification routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use herald_common::error::AppError;
use herald_common::types::ScheduledNotification;
use herald_engine::schedule::{CreateSchedulePayload, UpdateSchedulePayload};

use super::{ListQuery, list_body, message_body};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/scheduled-notifications",
            get(list_schedules).post(create_schedule),
        )
        .route(
            "/api/v1/scheduled-notifications/{schedule_id}",
            get(get_schedule)
                .put(update_schedule)
                .delete(delete_schedule),
        )
        .route(
            "/api/v1/scheduled-notifications/{schedule_id}/pause",
            post(pause_schedule),
        )
        .route(
            "/api/v1/scheduled-notifications/{schedule_id}/resume",
            post(resume_schedule),
        )
}

/// POST /api/v1/scheduled-notifications — Create an active schedule.
async fn create_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<CreateSchedulePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduledNotification>), AppError> {
    let Json(payload) = payload?;
    let schedule = state.schedules.create(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET /api/v1/scheduled-notifications — The caller's schedules.
async fn list_schedules(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let page = state.schedules.list(&actor, &query.page()?).await?;
    list_body(page)
}

async fn get_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(schedule_id): Path<String>,
) -> Result<Json<ScheduledNotification>, AppError> {
    Ok(Json(state.schedules.get(&actor, &schedule_id).await?))
}

/// PUT /api/v1/scheduled-notifications/{schedule_id} — Change variables or cron.
async fn update_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(schedule_id): Path<String>,
    payload: Result<Json<UpdateSchedulePayload>, JsonRejection>,
) -> Result<Json<ScheduledNotification>, AppError> {
    let Json(payload) = payload?;
    let schedule = state
        .schedules
        .update(&actor, &schedule_id, payload)
        .await?;
    Ok(Json(schedule))
}

async fn pause_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(schedule_id): Path<String>,
) -> Result<Json<ScheduledNotification>, AppError> {
    Ok(Json(state.schedules.pause(&actor, &schedule_id).await?))
}

async fn resume_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(schedule_id): Path<String>,
) -> Result<Json<ScheduledNotification>, AppError> {
    Ok(Json(state.schedules.resume(&actor, &schedule_id).await?))
}

async fn delete_schedule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(schedule_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.schedules.delete(&actor, &schedule_id).await?;
    Ok(message_body(format!(
        "Scheduled notification {schedule_id} deleted"
    )))
}
