// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tower_http::services::ServeDir;
use tracing::{error, warn};

use autoupdate_core::{UpdateDecisionEngine, UpdateError};

const FALLBACK_HOST: &str = "localhost";

#[derive(Debug, Clone)]
pub struct UpdateState {
    pub engine: Arc<UpdateDecisionEngine>,
}

/// `/update`, `/update/{label}` and the static file tree under `/static`.
pub fn router(state: UpdateState, public_dir: &Path) -> Router {
    Router::new()
        .route("/update", post(update_handler))
        .route("/update/{label}", post(labelled_update_handler))
        .with_state(state)
        .nest_service("/static", ServeDir::new(public_dir))
}

pub async fn update_handler(
    State(state): State<UpdateState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    respond(&state, &headers, &body, None).await
}

pub async fn labelled_update_handler(
    State(state): State<UpdateState>,
    UrlPath(label): UrlPath<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    respond(&state, &headers, &body, Some(&label)).await
}

async fn respond(
    state: &UpdateState,
    headers: &HeaderMap,
    body: &str,
    label: Option<&str>,
) -> Response {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(FALLBACK_HOST);

    match state.engine.handle_ping(body, host, label).await {
        Ok(xml) => ([(CONTENT_TYPE, "text/xml; charset=utf-8")], xml).into_response(),
        Err(UpdateError::MalformedRequest(reason)) => {
            warn!(%reason, "Rejected malformed update ping");
            (StatusCode::BAD_REQUEST, format!("malformed update request: {reason}")).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to answer update ping");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
