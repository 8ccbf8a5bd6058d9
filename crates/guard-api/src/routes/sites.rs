use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use guard_core::{SiteRuntimeState, StateMap};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub last_checked: Option<String>,
    pub failure_threshold: u32,
    pub sites: Vec<SiteRuntimeState>,
}

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub cleared: usize,
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub records: StateMap,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub failure_threshold: u32,
}

#[derive(Serialize)]
pub struct ThresholdResponse {
    pub failure_threshold: u32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/site", get(get_site))
        .route(
            "/notifications",
            get(get_notifications).delete(clear_notifications),
        )
        .route("/threshold", get(get_threshold).put(set_threshold))
}

/// GET /api/v1/status
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let monitor = &state.monitor;
    Json(StatusResponse {
        state: monitor.state().await.to_string(),
        last_checked: monitor.last_checked().await.map(|t| t.to_rfc3339()),
        failure_threshold: monitor.failure_threshold(),
        sites: monitor.status(),
    })
}

/// GET /api/v1/site?url=...
async fn get_site(
    State(state): State<AppState>,
    Query(query): Query<SiteQuery>,
) -> Result<Json<SiteRuntimeState>, ApiError> {
    state
        .monitor
        .site_status(&query.url)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No runtime state for {}", query.url)))
}

/// GET /api/v1/notifications
async fn get_notifications(State(state): State<AppState>) -> Json<NotificationsResponse> {
    Json(NotificationsResponse {
        records: state.monitor.notification_records().await,
    })
}

/// DELETE /api/v1/notifications[?url=...]
///
/// With a url, forgets that site's notification history; without, forgets
/// everything.
async fn clear_notifications(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    match query.url {
        Some(url) => {
            let cleared = state.monitor.clear_site(&url).await;
            if !cleared {
                return Err(ApiError::NotFound(format!(
                    "No notification record for {}",
                    url
                )));
            }
            Ok(Json(ClearResponse {
                message: format!("Notification state cleared for {}", url),
                cleared: 1,
            }))
        }
        None => {
            let cleared = state.monitor.clear_all().await;
            Ok(Json(ClearResponse {
                message: "All notification state cleared".into(),
                cleared,
            }))
        }
    }
}

/// GET /api/v1/threshold
async fn get_threshold(State(state): State<AppState>) -> Json<ThresholdResponse> {
    Json(ThresholdResponse {
        failure_threshold: state.monitor.failure_threshold(),
    })
}

/// PUT /api/v1/threshold
async fn set_threshold(
    State(state): State<AppState>,
    Json(body): Json<ThresholdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .monitor
        .set_failure_threshold(body.failure_threshold)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(ThresholdResponse {
        failure_threshold: state.monitor.failure_threshold(),
    }))
}
