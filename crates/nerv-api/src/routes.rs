//! HTTP route handlers.
//!
//! Every API handler turns one request into one job on a named computer and
//! relays the result. Failures use the shape `{"error": true, "message": ...}`.

use crate::computers::{self, battery, Battery, ListKind, ListParams, MeSystem};
use crate::server::AppState;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use nerv_wire::{JobError, Payload};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{error, info};

const STATUS_FAILED: &str = "Failed to get status";
const LIST_FAILED: &str = "Failed to get list";

/// Error response of the JSON API.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": true, "message": self.message})),
        )
            .into_response()
    }
}

/// Relay a job result. A result reporting its own error is passed through
/// verbatim with status 500.
fn job_response(result: Result<Payload, JobError>, context: &str) -> Response {
    match result {
        Ok(payload) if computers::reports_error(&payload) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
        Ok(payload) => Json(payload).into_response(),
        Err(e) => {
            error!(error = %e, "{context}");
            ApiError::internal(format!("{context}: {e}")).into_response()
        }
    }
}

/// GET /api/computers: labels of the connected computers.
pub async fn computers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"computers": state.registry().labels()}))
}

/// GET /api/me/status
pub async fn me_status(State(state): State<AppState>) -> Response {
    info!("Processing status check request");
    let me = MeSystem::new(state.registry().clone(), state.job_timeout);
    job_response(me.status().await, STATUS_FAILED)
}

async fn me_list_kind(state: AppState, kind: ListKind, params: ListParams) -> Response {
    info!(job_type = kind.job_type(), "Processing list request");
    let me = MeSystem::new(state.registry().clone(), state.job_timeout);
    job_response(me.list(kind, params).await, LIST_FAILED)
}

/// GET /api/me/list
pub async fn me_list(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    me_list_kind(state, ListKind::All, params).await
}

/// GET /api/me/listItems
pub async fn me_list_items(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    me_list_kind(state, ListKind::Items, params).await
}

/// GET /api/me/listFluid
pub async fn me_list_fluid(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    me_list_kind(state, ListKind::Fluid, params).await
}

/// GET /api/me/listGas
pub async fn me_list_gas(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    me_list_kind(state, ListKind::Gas, params).await
}

#[derive(Debug, Deserialize)]
pub struct BatteryQuery {
    pub units: Option<String>,
}

/// GET /api/battery/status?units=j|fe
pub async fn battery_status(
    State(state): State<AppState>,
    Query(query): Query<BatteryQuery>,
) -> Response {
    info!("Processing battery status check request");
    let Some(units) = battery::resolve_units(query.units.as_deref()) else {
        return ApiError::bad_request("Invalid units").into_response();
    };
    let battery = Battery::new(state.registry().clone(), state.job_timeout);
    job_response(battery.status(units).await, STATUS_FAILED)
}

/// GET /list: moved to /me/list.
pub async fn legacy_list() -> impl IntoResponse {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/me/list")])
}

/// Static web UI. `/page` is served from `page.html` when `page` itself
/// does not exist.
pub async fn static_files(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = serve_dir(&state.static_dir, request).await;
    if response.status() != StatusCode::NOT_FOUND || !has_bare_name(&path) {
        return response;
    }
    match Request::builder()
        .method(method)
        .uri(format!("{path}.html"))
        .body(Body::empty())
    {
        Ok(retry) => serve_dir(&state.static_dir, retry).await,
        Err(_) => response,
    }
}

async fn serve_dir(dir: &Path, request: Request) -> Response {
    let dir = ServeDir::new(dir).append_index_html_on_directories(true);
    match dir.oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

/// Last path segment is non-empty and has no extension.
fn has_bare_name(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| !name.is_empty() && !name.contains('.'))
}
