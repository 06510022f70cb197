//! Filter profile CRUD and dry-run evaluation.
//!
//! Every write goes through [`ProfileStore`](grantflow_rules::ProfileStore),
//! which saves the whole document. Rule-level problems such as an invalid
//! regex do not block a write; they come back as `warnings`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use grantflow_rules::{evaluate, Evaluation, EvaluationInput, FilterProfile, FilterRule};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProfileWriteResponse {
    pub profile: FilterProfile,
    pub warnings: Vec<String>,
}

/// Free-text dry-run input. `text` is scored together with the title.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EvaluateRequest {
    pub title: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub amounts: Vec<f64>,
}

impl From<EvaluateRequest> for EvaluationInput {
    fn from(req: EvaluateRequest) -> Self {
        let mut input = EvaluationInput::new(req.title);
        input.department = req.department;
        input.enrichment.extend(req.text);
        input.amounts = req.amounts;
        input
    }
}

fn written(state: &AppState, name: &str, warnings: Vec<String>) -> ApiResult<Json<ProfileWriteResponse>> {
    let profile = state
        .profiles
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("profile {name}")))?;
    Ok(Json(ProfileWriteResponse { profile, warnings }))
}

#[utoipa::path(
    get,
    path = "/profiles",
    tag = "Profiles",
    responses(
        (status = 200, description = "All filter profiles in document order", body = Object)
    )
)]
pub(crate) async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<FilterProfile>> {
    Json(state.profiles.list())
}

#[utoipa::path(
    get,
    path = "/profiles/{name}",
    tag = "Profiles",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    responses(
        (status = 200, description = "Profile", body = Object),
        (status = 404, description = "Profile not found")
    )
)]
pub(crate) async fn show(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<FilterProfile>> {
    state
        .profiles
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("profile {name}")))
}

#[utoipa::path(
    put,
    path = "/profiles/{name}",
    tag = "Profiles",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    request_body(content = Object, description = "{description, rules, min_score}"),
    responses(
        (status = 200, description = "Profile saved, with rule warnings", body = Object),
        (status = 422, description = "Profile rejected (no rules, bad weight)")
    )
)]
pub(crate) async fn upsert(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(mut profile): Json<FilterProfile>,
) -> ApiResult<Json<ProfileWriteResponse>> {
    profile.name = name.clone();
    let warnings = state.profiles.upsert(profile)?;
    written(&state, &name, warnings)
}

#[utoipa::path(
    delete,
    path = "/profiles/{name}",
    tag = "Profiles",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    responses(
        (status = 204, description = "Profile removed"),
        (status = 404, description = "Profile not found")
    )
)]
pub(crate) async fn remove(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.profiles.remove(&name)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("profile {name}")))
    }
}

#[utoipa::path(
    put,
    path = "/profiles/{name}/rules/{rule}",
    tag = "Profiles",
    params(
        ("name" = String, Path, description = "Profile name"),
        ("rule" = String, Path, description = "Rule name; replaced if present, appended otherwise")
    ),
    request_body(content = Object, description = "{kind, value, weight, required, description}"),
    responses(
        (status = 200, description = "Rule saved, with rule warnings", body = Object),
        (status = 404, description = "Profile not found")
    )
)]
pub(crate) async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path((name, rule_name)): Path<(String, String)>,
    Json(mut rule): Json<FilterRule>,
) -> ApiResult<Json<ProfileWriteResponse>> {
    rule.name = rule_name;
    let warnings = state.profiles.update_rule(&name, rule)?;
    written(&state, &name, warnings)
}

#[utoipa::path(
    post,
    path = "/profiles/{name}/evaluate",
    tag = "Profiles",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Per-rule evaluation; nothing is stored", body = Object),
        (status = 404, description = "Profile not found")
    )
)]
pub(crate) async fn dry_run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<Json<Evaluation>> {
    let profile = state
        .profiles
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("profile {name}")))?;
    Ok(Json(evaluate(&req.into(), &profile)))
}
