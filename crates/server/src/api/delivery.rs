//! Delivery endpoints: sends, resends, sweeps, history and export callbacks.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use grantflow_core::{AttemptFilter, DeliveryAttempt, DeliveryStats, ExportMarkers, Trigger};
use grantflow_notify::{BatchReport, DeliveryCallback, DeliveryOutcome, OutcomeStatus, SweepReport};
use grantflow_storage::DEFAULT_HISTORY_LIMIT;

use super::require_delivery;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ── Request types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchSendRequest {
    pub grant_ids: Vec<String>,
    /// In-flight sends; defaults to the configured batch concurrency.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ResendParams {
    /// Resend even when the grant was already delivered.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// HTTP status for a single-grant outcome.
fn outcome_status(outcome: &DeliveryOutcome) -> StatusCode {
    match outcome.status {
        OutcomeStatus::Delivered | OutcomeStatus::AlreadyDelivered | OutcomeStatus::Superseded => StatusCode::OK,
        OutcomeStatus::Retrying => StatusCode::ACCEPTED,
        OutcomeStatus::Failed => StatusCode::BAD_GATEWAY,
        OutcomeStatus::NotFound => StatusCode::NOT_FOUND,
        OutcomeStatus::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Sends ─────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/delivery/send",
    tag = "Delivery",
    request_body = BatchSendRequest,
    responses(
        (status = 200, description = "Per-grant results", body = Object),
        (status = 400, description = "Empty grant list"),
        (status = 503, description = "Webhook not configured")
    )
)]
pub(crate) async fn send_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchSendRequest>,
) -> ApiResult<Json<BatchReport>> {
    let delivery = require_delivery(&state)?;
    if req.grant_ids.is_empty() {
        return Err(ApiError::InvalidInput("grant_ids must not be empty".into()));
    }
    Ok(Json(delivery.deliver_batch(&req.grant_ids, req.concurrency).await))
}

#[utoipa::path(
    post,
    path = "/delivery/send/{id}",
    tag = "Delivery",
    params(
        ("id" = String, Path, description = "Grant ID, e.g. BDNS-812345")
    ),
    responses(
        (status = 200, description = "Delivered or already delivered", body = Object),
        (status = 202, description = "Failed transiently, retry scheduled", body = Object),
        (status = 404, description = "Grant not found", body = Object),
        (status = 502, description = "Delivery failed terminally", body = Object)
    )
)]
pub(crate) async fn send_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<DeliveryOutcome>)> {
    let delivery = require_delivery(&state)?;
    let outcome = delivery.deliver(&id, Trigger::Manual).await;
    Ok((outcome_status(&outcome), Json(outcome)))
}

#[utoipa::path(
    post,
    path = "/delivery/resend/{id}",
    tag = "Delivery",
    params(
        ("id" = String, Path, description = "Grant ID"),
        ResendParams
    ),
    responses(
        (status = 200, description = "Resent, or skipped because already delivered", body = Object),
        (status = 202, description = "Retry scheduled", body = Object),
        (status = 404, description = "Grant not found", body = Object)
    )
)]
pub(crate) async fn resend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ResendParams>,
) -> ApiResult<(StatusCode, Json<DeliveryOutcome>)> {
    let delivery = require_delivery(&state)?;
    let outcome = delivery.resend(&id, params.force).await;
    Ok((outcome_status(&outcome), Json(outcome)))
}

#[utoipa::path(
    post,
    path = "/delivery/retry-failed",
    tag = "Delivery",
    params(LimitParams),
    responses(
        (status = 200, description = "Resend results for terminally failed grants", body = Object)
    )
)]
pub(crate) async fn retry_failed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<BatchReport>> {
    let delivery = require_delivery(&state)?;
    let limit = params.limit.unwrap_or(state.config.delivery.sweep_limit);
    Ok(Json(delivery.retry_failed(limit).await))
}

#[utoipa::path(
    post,
    path = "/delivery/sweep",
    tag = "Delivery",
    params(LimitParams),
    responses(
        (status = 200, description = "Due retries and caught-up grants", body = Object)
    )
)]
pub(crate) async fn sweep(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<SweepReport>> {
    let delivery = require_delivery(&state)?;
    let limit = params.limit.unwrap_or(state.config.delivery.sweep_limit);
    Ok(Json(delivery.sweep(Utc::now(), limit).await))
}

// ── History & stats ───────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/delivery/stats",
    tag = "Delivery",
    responses(
        (status = 200, description = "Attempt counters and success rate", body = Object)
    )
)]
pub(crate) async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<DeliveryStats>> {
    Ok(Json(state.log.stats(Utc::now()).await?))
}

#[utoipa::path(
    get,
    path = "/delivery/history",
    tag = "Delivery",
    params(
        ("grant_id" = Option<String>, Query, description = "Only attempts for this grant"),
        ("status" = Option<String>, Query, description = "pending, success, failed or retrying"),
        ("limit" = Option<usize>, Query, description = "Maximum attempts returned")
    ),
    responses(
        (status = 200, description = "Attempts, newest first", body = Object)
    )
)]
pub(crate) async fn history(
    State(state): State<Arc<AppState>>,
    Query(mut filter): Query<AttemptFilter>,
) -> ApiResult<Json<Vec<DeliveryAttempt>>> {
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    Ok(Json(state.log.history(&filter).await?))
}

// ── Callback ──────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/delivery/callback",
    tag = "Delivery",
    request_body(content = Object, description = "{grant_id, status: success|error, row_id?, sheets_url?, error_message?}"),
    responses(
        (status = 200, description = "Export markers recorded", body = Object),
        (status = 404, description = "Grant not found")
    )
)]
pub(crate) async fn callback(
    State(state): State<Arc<AppState>>,
    Json(callback): Json<DeliveryCallback>,
) -> ApiResult<Json<ExportMarkers>> {
    let delivery = require_delivery(&state)?;
    Ok(Json(delivery.handle_callback(&callback).await?))
}
