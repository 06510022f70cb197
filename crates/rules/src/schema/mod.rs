//! Profile document schema with serde deserialization.
//!
//! - `FilterProfile`: named rule bundle plus `min_score`
//! - `FilterRule`: one weighted rule
//! - `RuleKind`: closed set of rule kinds (unknown names are kept, not rejected)

mod kind;
mod profile;

pub use kind::*;
pub use profile::*;

#[cfg(test)]
mod tests;
