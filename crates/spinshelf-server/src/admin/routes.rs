//! Admin HTTP surface.
//!
//! | method | path | purpose |
//! |--------|------|---------|
//! | POST | `/admin/refresh` | invalidate one tag or purge all |
//! | GET | `/admin/history` | list invalidation events |
//! | POST | `/admin/history` | record an event |
//! | DELETE | `/admin/history` | clear the log |
//! | GET | `/admin/cache` | cache statistics |
//!
//! [`AdminAuth`] runs before any body is read, so rejected callers never
//! reach the cache or the log.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::auth::AdminAuth;
use super::revalidate::Ack;
use crate::cache::{CacheStats, CacheTag};
use crate::error::ApiError;
use crate::history::{HistoryAction, HistoryEvent};
use crate::server::AppState;

const PURGE_ALL_ACTION: &str = "purge-all";

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub tag: String,
    pub action: HistoryAction,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEvent>,
    pub count: usize,
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/refresh", post(refresh))
        .route(
            "/admin/history",
            get(list_history).post(record_history).delete(clear_history),
        )
        .route("/admin/cache", get(cache_stats))
}

async fn refresh(
    _admin: AdminAuth,
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(req) = body?;

    let ack = match (req.action.as_deref(), req.tag.as_deref()) {
        (Some(PURGE_ALL_ACTION), _) => state.revalidator.purge_all(),
        (Some(other), _) => {
            return Err(ApiError::BadRequest(format!("unknown action '{other}'")));
        }
        (None, Some(tag)) => {
            let tag: CacheTag = tag.parse()?;
            state.revalidator.refresh_tag(&tag)
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "request must contain 'tag' or 'action'".into(),
            ));
        }
    };

    tracing::info!(removed = ack.removed, "revalidation requested");
    Ok(Json(ack))
}

async fn list_history(_admin: AdminAuth, State(state): State<AppState>) -> Json<HistoryResponse> {
    let history = state.revalidator.history().list();
    Json(HistoryResponse {
        count: history.len(),
        history,
    })
}

async fn record_history(
    _admin: AdminAuth,
    State(state): State<AppState>,
    body: Result<Json<RecordRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let tag = req.tag.trim();
    if tag.is_empty() {
        return Err(ApiError::BadRequest("tag must not be empty".into()));
    }
    let event = state.revalidator.record(tag, req.action);
    Ok(Json(json!({ "success": true, "event": event })))
}

async fn clear_history(_admin: AdminAuth, State(state): State<AppState>) -> Json<Value> {
    let removed = state.revalidator.history().clear();
    tracing::info!(removed, "revalidation history cleared");
    Json(json!({
        "success": true,
        "message": format!("cleared {removed} history events"),
    }))
}

async fn cache_stats(_admin: AdminAuth, State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.revalidator.cache().stats())
}
