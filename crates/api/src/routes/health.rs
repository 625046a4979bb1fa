//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health — liveness plus a point read against the store.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (status, code, store) = match state.store.get_config("*").await {
        Ok(_) => ("ok", StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Store readiness check failed");
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        code,
        Json(json!({
            "status": status,
            "service": "herald-api",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": { "store": store }
        })),
    )
}
