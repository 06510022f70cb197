//! Filter profile and rule definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use grantflow_core::GrantError;

use super::kind::RuleKind;

fn default_weight() -> f64 {
    1.0
}

fn default_min_score() -> f64 {
    0.5
}

/// One weighted rule inside a profile.
///
/// `value` depends on `kind`: a keyword list for include/exclude/department,
/// a pattern string for regex, `{min, max}` for amount ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub name: String,
    #[serde(alias = "filter_type")]
    pub kind: RuleKind,
    pub value: Value,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl FilterRule {
    pub fn new(name: impl Into<String>, kind: RuleKind, value: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            weight: 1.0,
            required: false,
            description: String::new(),
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Keyword-list rule from string slices.
    pub fn keywords(name: impl Into<String>, kind: RuleKind, words: &[&str]) -> Self {
        Self::new(name, kind, Value::from(words.iter().map(|w| w.to_string()).collect::<Vec<_>>()))
    }
}

/// Named, reusable scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterProfile {
    /// Filled from the document key on load.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<FilterRule>,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl FilterProfile {
    pub fn new(name: impl Into<String>, description: impl Into<String>, rules: Vec<FilterRule>, min_score: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            rules,
            min_score,
            created_at: Some(Utc::now()),
        }
    }

    /// Structural checks. Rule-level problems such as a bad regex are not
    /// errors here; see [`crate::evaluator::CompiledProfile::problems`].
    pub fn validate(&self) -> Result<(), GrantError> {
        if self.name.trim().is_empty() {
            return Err(GrantError::Validation("profile name must not be empty".into()));
        }
        if self.rules.is_empty() {
            return Err(GrantError::Validation(format!(
                "profile '{}' has no rules",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(GrantError::Validation(format!(
                "profile '{}': min_score {} outside 0..=1",
                self.name, self.min_score
            )));
        }
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(GrantError::Validation(format!(
                    "profile '{}' has a rule without a name",
                    self.name
                )));
            }
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                return Err(GrantError::Validation(format!(
                    "profile '{}': rule '{}' has invalid weight {}",
                    self.name, rule.name, rule.weight
                )));
            }
        }
        Ok(())
    }

    /// Replace the rule with the same name, or append it.
    pub fn set_rule(&mut self, rule: FilterRule) {
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.rules.iter().map(|r| r.weight).sum()
    }
}
