//! HTTP trigger surface, background loops and shared state for the
//! `grantflow` binary.

pub mod api;
pub mod background;
pub mod db;
pub mod error;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::{open_profiles, AppState, CaptureOutcome};
