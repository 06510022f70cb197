//! HTTP router construction.
//!
//! Assembles all Axum routes, middleware, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/health", get(api::health::health))
        .route("/config", get(api::health::config))
        .route("/capture/{source}", post(api::capture::run_capture))
        // Delivery
        .route("/delivery/send", post(api::delivery::send_batch))
        .route("/delivery/send/{id}", post(api::delivery::send_one))
        .route("/delivery/resend/{id}", post(api::delivery::resend))
        .route("/delivery/retry-failed", post(api::delivery::retry_failed))
        .route("/delivery/sweep", post(api::delivery::sweep))
        .route("/delivery/stats", get(api::delivery::stats))
        .route("/delivery/history", get(api::delivery::history))
        .route("/delivery/callback", post(api::delivery::callback))
        // Profiles
        .route("/profiles", get(api::profiles::list))
        .route(
            "/profiles/{name}",
            get(api::profiles::show)
                .put(api::profiles::upsert)
                .delete(api::profiles::remove),
        )
        .route("/profiles/{name}/rules/{rule}", put(api::profiles::update_rule))
        .route("/profiles/{name}/evaluate", post(api::profiles::dry_run))
        .layer(cors)
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}

/// `*` allows any origin; anything else is a single allowed origin.
fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::permissive().allow_origin(value),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS_ORIGIN, allowing any origin");
            CorsLayer::permissive()
        }
    }
}
