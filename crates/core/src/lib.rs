//! Shared model for the grant capture and delivery pipeline.
//!
//! - [`Grant`] / [`GrantDraft`]: canonical record and normalizer output
//! - [`RawRecord`]: opaque record yielded by source adapters
//! - [`DeliveryAttempt`]: append-only delivery history entry
//! - [`GrantError`]: error taxonomy used across crates
//! - [`Config`]: profiled environment configuration

pub mod amounts;
pub mod config;
pub mod dates;
pub mod delivery;
pub mod error;
pub mod grant;
pub mod raw;

pub use config::Config;
pub use delivery::*;
pub use error::*;
pub use grant::*;
pub use raw::RawRecord;
