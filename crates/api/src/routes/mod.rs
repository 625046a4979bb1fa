pub mod health;
pub mod preferences;
pub mod schedules;
pub mod system_config;
pub mod templates;
pub mod users;

use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use herald_common::error::AppError;
use herald_store::{Page, PageRequest};

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(users::router())
        .merge(templates::router())
        .merge(preferences::router())
        .merge(system_config::router())
        .merge(schedules::router())
        .with_state(state)
}

/// Query string shared by list and context-scoped calls.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub context: Option<String>,
    pub limit: Option<usize>,
    pub next_token: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> Result<PageRequest, AppError> {
        PageRequest::from_params(self.limit, self.next_token.as_deref())
    }

    /// The requested context, empty meaning the caller's own.
    pub fn context(&self) -> &str {
        self.context.as_deref().unwrap_or_default()
    }
}

/// `{items, count, nextToken?}` body of a list call.
pub fn list_body<T: serde::Serialize>(page: Page<T>) -> Result<Json<Value>, AppError> {
    let next_token = page.next_token();
    let count = page.items.len();
    let mut body = json!({
        "items": serde_json::to_value(page.items)?,
        "count": count,
    });
    if let Some(token) = next_token {
        body["nextToken"] = Value::String(token);
    }
    Ok(Json(body))
}

/// `{message}` body of a delete call.
pub fn message_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "message": message.into() }))
}
