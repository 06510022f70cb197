//! Health and configuration endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub profile: String,
    /// `None` when the grant store could not be queried.
    pub grants: Option<u64>,
    pub filter_profiles: usize,
    pub delivery_enabled: bool,
    pub auto_forward: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server health", body = Object)
    )
)]
pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let grants = match state.grants.count().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "health: grant count failed");
            None
        }
    };
    Json(HealthResponse {
        status: if grants.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        profile: state.config.profile_label().to_string(),
        grants,
        filter_profiles: state.profiles.names().len(),
        delivery_enabled: state.delivery.is_some(),
        auto_forward: state.config.delivery.auto_forward,
    })
}

#[utoipa::path(
    get,
    path = "/config",
    tag = "Health",
    responses(
        (status = 200, description = "Active configuration with secrets redacted", body = Object)
    )
)]
pub(crate) async fn config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.config.redacted_summary())
}
