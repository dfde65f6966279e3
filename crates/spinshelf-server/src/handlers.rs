use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Spinshelf",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let credential_cached = state
        .catalog
        .client()
        .tokens()
        .current()
        .is_some_and(|c| c.is_valid());
    let body = json!({
        "status": "ready",
        "credential_cached": credential_cached,
        "admin_enabled": state.admin.is_configured(),
        "cache_entries": state.catalog.cache().len(),
    });
    (StatusCode::OK, Json(body))
}
