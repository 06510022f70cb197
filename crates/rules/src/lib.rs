//! Weighted rule engine for grant eligibility.
//!
//! This crate provides:
//! - Profile/rule schema with serde deserialization (JSON or YAML)
//! - Compiled per-rule matchers and weighted profile evaluation
//! - Multi-profile evaluation and batch statistics
//! - `ProfileStore`: profile document with atomic saves and hot-reload via `notify`

pub mod evaluator;
pub mod schema;
pub mod statistics;
pub mod store;

pub use evaluator::{evaluate, evaluate_compiled, evaluate_many, CompiledProfile, Evaluation, EvaluationInput, MultiEvaluation, RuleResult};
pub use schema::{FilterProfile, FilterRule, RuleKind};
pub use statistics::FilterStatistics;
pub use store::{default_profiles, ProfileError, ProfileStore};
