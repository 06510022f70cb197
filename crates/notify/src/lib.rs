//! Delivery of captured grants to the downstream workflow webhook.
//!
//! This crate provides:
//! - `WebhookClient` trait and its reqwest implementation
//! - Minijinja summaries and the JSON payload builder
//! - `RetryPolicy` exponential backoff
//! - `DeliveryService`: attempts, sweeps, batches, resends and export callbacks

pub mod backoff;
pub mod delivery;
pub mod payload;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use backoff::RetryPolicy;
pub use delivery::{
    BatchReport, CallbackStatus, DeliveryCallback, DeliveryOutcome, DeliveryService, OutcomeStatus, SweepReport,
};
pub use templating::{ExtractionMethod, SummaryRenderer};
pub use traits::{NotifyError, WebhookClient, WebhookResponse};
pub use webhook::HttpWebhookClient;
