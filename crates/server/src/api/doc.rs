//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI 3.1 spec, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "grantflow API",
        version = "0.1.0",
        description = "Grant capture from BOE, BDNS and PLACSP, weighted profile filtering, and webhook delivery with retries.",
    ),
    tags(
        (name = "Health", description = "Server readiness and redacted configuration"),
        (name = "Capture", description = "On-demand capture runs per source"),
        (name = "Delivery", description = "Webhook sends, resends, sweeps, history and export callbacks"),
        (name = "Profiles", description = "Filter profile CRUD and dry-run evaluation"),
    ),
    paths(
        // Health
        crate::api::health::health,
        crate::api::health::config,
        // Capture
        crate::api::capture::run_capture,
        // Delivery
        crate::api::delivery::send_batch,
        crate::api::delivery::send_one,
        crate::api::delivery::resend,
        crate::api::delivery::retry_failed,
        crate::api::delivery::sweep,
        crate::api::delivery::stats,
        crate::api::delivery::history,
        crate::api::delivery::callback,
        // Profiles
        crate::api::profiles::list,
        crate::api::profiles::show,
        crate::api::profiles::upsert,
        crate::api::profiles::remove,
        crate::api::profiles::update_rule,
        crate::api::profiles::dry_run,
    ),
    components(schemas(
        crate::api::delivery::BatchSendRequest,
        crate::api::profiles::EvaluateRequest,
    ))
)]
pub struct ApiDoc;
