//! Capture trigger endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use grantflow_core::{GrantError, Source};
use grantflow_ingest::CaptureRequest;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, CaptureOutcome};

#[utoipa::path(
    post,
    path = "/capture/{source}",
    tag = "Capture",
    params(
        ("source" = String, Path, description = "Source: boe, bdns or placsp")
    ),
    request_body(content = Object, description = "Optional window, limits and profile names: {from, to, lookback_days, max_results, max_pages, profiles}"),
    responses(
        (status = 200, description = "Capture statistics", body = Object),
        (status = 400, description = "Unknown source, unknown profile or inverted window"),
        (status = 502, description = "Source unreachable")
    )
)]
pub(crate) async fn run_capture(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Json(request): Json<CaptureRequest>,
) -> ApiResult<Json<CaptureOutcome>> {
    let source: Source = source.parse().map_err(ApiError::InvalidInput)?;
    if let (Some(from), Some(to)) = (request.from, request.to) {
        if from > to {
            return Err(ApiError::InvalidInput(format!("from {from} is after to {to}")));
        }
    }
    let outcome = state.capture(source, &request).await.map_err(|e| match e {
        GrantError::Validation(message) => ApiError::InvalidInput(message),
        other => ApiError::Grant(other),
    })?;
    Ok(Json(outcome))
}
