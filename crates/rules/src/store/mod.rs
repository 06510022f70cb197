//! Filter profile document store with hot-reload via `notify` watcher.
//!
//! The whole document is loaded and saved as a unit, JSON or YAML by file
//! extension. Saves are atomic (tmp file, then rename).

mod core;
mod defaults;
mod error;
mod watcher;


pub use self::core::{DocumentFormat, ProfileStore};
pub use self::defaults::default_profiles;
pub use self::error::{ProfileError, Result};
