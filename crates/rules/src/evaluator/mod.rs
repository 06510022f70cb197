//! Weighted profile evaluation.
//!
//! A profile is compiled once into a [`CompiledProfile`] (one [`RuleMatcher`]
//! per rule) and then scored against any number of [`EvaluationInput`]s.
//! Scoring is a pure function of the input and the profile:
//!
//! - `total_score = Σ(score × weight of passed rules) / Σ(all weights)`
//! - `passed = every required rule passed && total_score >= min_score`
//!
//! A rule that fails to compile (unknown kind, bad regex, wrong value shape)
//! is reported with `error` set and scored as failed/0. It never aborts the
//! rest of the profile.

mod matcher;
mod text;

use serde::{Deserialize, Serialize};
use tracing::warn;

use grantflow_core::amounts::extract_amounts;
use grantflow_core::{GrantDraft, GrantError};

use crate::schema::{FilterProfile, FilterRule, RuleKind};

pub use matcher::{RuleMatcher, RuleScore};
pub use text::{fold, Haystack};

// ── Input ───────────────────────────────────────────────────────────

/// Text and amounts a profile is scored against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub title: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub epigraph: Option<String>,
    /// Extra searchable text: enrichment body, purpose, summaries.
    #[serde(default)]
    pub enrichment: Vec<String>,
    #[serde(default)]
    pub amounts: Vec<f64>,
}

impl EvaluationInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }

    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn enrichment(mut self, text: impl Into<String>) -> Self {
        self.enrichment.push(text.into());
        self
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amounts.push(amount);
        self
    }

    /// Budget first, then every amount mentioned by enrichment.
    pub fn from_draft(draft: &GrantDraft) -> Self {
        let mut amounts: Vec<f64> = draft.budget_amount.into_iter().collect();
        for mention in &draft.amounts {
            amounts.extend(extract_amounts(mention));
        }

        let enrichment = [draft.purpose.as_deref(), draft.content_text.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();

        Self {
            title: draft.title.clone(),
            department: draft.department.clone(),
            section: draft.section.clone(),
            epigraph: draft.epigraph.clone(),
            enrichment,
            amounts,
        }
    }

    fn haystack(&self) -> Haystack {
        let parts = std::iter::once(self.title.as_str())
            .chain(self.department.as_deref())
            .chain(self.section.as_deref())
            .chain(self.epigraph.as_deref())
            .chain(self.enrichment.iter().map(String::as_str));
        Haystack::new(parts, self.department.as_deref().unwrap_or(""))
    }
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    pub kind: RuleKind,
    pub passed: bool,
    pub score: f64,
    pub weight: f64,
    pub required: bool,
    pub matches: Vec<String>,
    /// Set when the rule could not be compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub profile: String,
    pub passed: bool,
    pub total_score: f64,
    pub min_score: f64,
    pub required_passed: usize,
    pub required_total: usize,
    pub rule_results: Vec<RuleResult>,
    /// Names of rules that passed.
    pub matched_rules: Vec<String>,
}

/// Result of scoring one input against several profiles. `best_profile`
/// stays `None` when no profile scores above zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEvaluation {
    pub best_profile: Option<String>,
    pub best_score: f64,
    pub passed_profiles: Vec<String>,
    pub results: Vec<Evaluation>,
}

impl MultiEvaluation {
    pub fn any_passed(&self) -> bool {
        !self.passed_profiles.is_empty()
    }
}

// ── Compiled profile ────────────────────────────────────────────────

struct CompiledRule<'p> {
    rule: &'p FilterRule,
    matcher: Result<RuleMatcher, GrantError>,
}

/// A profile with every rule compiled, borrowed from the source profile.
pub struct CompiledProfile<'p> {
    profile: &'p FilterProfile,
    rules: Vec<CompiledRule<'p>>,
}

impl<'p> CompiledProfile<'p> {
    pub fn compile(profile: &'p FilterProfile) -> Self {
        let rules = profile
            .rules
            .iter()
            .map(|rule| {
                let matcher = RuleMatcher::compile(rule);
                if let Err(e) = &matcher {
                    warn!(profile = %profile.name, rule = %rule.name, error = %e, "rule failed to compile");
                }
                CompiledRule { rule, matcher }
            })
            .collect();
        Self { profile, rules }
    }

    /// Rule-level problems: one message per rule that failed to compile.
    pub fn problems(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|c| c.matcher.as_ref().err().map(|e| e.to_string()))
            .collect()
    }

    pub fn evaluate(&self, input: &EvaluationInput) -> Evaluation {
        let hay = input.haystack();
        let mut rule_results = Vec::with_capacity(self.rules.len());

        for compiled in &self.rules {
            let rule = compiled.rule;
            let (score, error) = match &compiled.matcher {
                Ok(m) => (m.score(&hay, &input.amounts), None),
                Err(e) => (
                    RuleScore { passed: false, score: 0.0, matches: Vec::new() },
                    Some(e.to_string()),
                ),
            };
            rule_results.push(RuleResult {
                rule_name: rule.name.clone(),
                kind: rule.kind.clone(),
                passed: score.passed,
                score: score.score,
                weight: rule.weight,
                required: rule.required,
                matches: score.matches,
                error,
            });
        }

        let total_weight: f64 = rule_results.iter().map(|r| r.weight).sum();
        let weighted: f64 = rule_results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.score * r.weight)
            .sum();
        let total_score = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };

        let required_total = rule_results.iter().filter(|r| r.required).count();
        let required_passed = rule_results.iter().filter(|r| r.required && r.passed).count();
        let matched_rules = rule_results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.rule_name.clone())
            .collect();

        Evaluation {
            profile: self.profile.name.clone(),
            passed: required_passed == required_total && total_score >= self.profile.min_score,
            total_score,
            min_score: self.profile.min_score,
            required_passed,
            required_total,
            rule_results,
            matched_rules,
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────

/// Score one input against one profile.
pub fn evaluate(input: &EvaluationInput, profile: &FilterProfile) -> Evaluation {
    CompiledProfile::compile(profile).evaluate(input)
}

/// Score one input against every profile. The strictly highest score wins;
/// ties keep the earlier profile.
pub fn evaluate_many<'a>(
    input: &EvaluationInput,
    profiles: impl IntoIterator<Item = &'a FilterProfile>,
) -> MultiEvaluation {
    collect(profiles.into_iter().map(|profile| evaluate(input, profile)))
}

/// [`evaluate_many`] over profiles compiled once up front, for callers that
/// score many inputs against the same set.
pub fn evaluate_compiled(input: &EvaluationInput, profiles: &[CompiledProfile<'_>]) -> MultiEvaluation {
    collect(profiles.iter().map(|compiled| compiled.evaluate(input)))
}

fn collect(evaluations: impl Iterator<Item = Evaluation>) -> MultiEvaluation {
    let mut best_profile = None;
    let mut best_score = 0.0;
    let mut passed_profiles = Vec::new();
    let mut results = Vec::new();

    for eval in evaluations {
        if eval.total_score > best_score {
            best_score = eval.total_score;
            best_profile = Some(eval.profile.clone());
        }
        if eval.passed {
            passed_profiles.push(eval.profile.clone());
        }
        results.push(eval);
    }

    MultiEvaluation { best_profile, best_score, passed_profiles, results }
}
