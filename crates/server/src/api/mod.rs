//! Domain-focused API endpoint modules.
//!
//! Each sub-module owns a single responsibility area. The delivery guard
//! shared by delivery endpoints lives here.

pub mod capture;
pub mod delivery;
pub mod doc;
pub mod health;
pub mod profiles;

use std::sync::Arc;

use grantflow_notify::DeliveryService;

use crate::error::ApiError;
use crate::state::AppState;

/// The delivery service, or 503 when no webhook is configured.
pub(crate) fn require_delivery(state: &AppState) -> Result<&Arc<DeliveryService>, ApiError> {
    state.delivery.as_ref().ok_or(ApiError::DeliveryDisabled)
}
