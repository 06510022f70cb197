//! Compiled per-rule matchers.
//!
//! Each [`FilterRule`] is compiled once into a [`RuleMatcher`]. Compilation
//! fails for unknown kinds, malformed values and invalid regexes; the caller
//! then scores that rule as failed without aborting the profile.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use grantflow_core::GrantError;

use crate::schema::{FilterRule, RuleKind};

use super::text::Haystack;

/// Outcome of one rule against one haystack.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    pub passed: bool,
    pub score: f64,
    pub matches: Vec<String>,
}

impl RuleScore {
    fn fail() -> Self {
        Self { passed: false, score: 0.0, matches: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Include(Vec<String>),
    Exclude(Vec<String>),
    Regex(Regex),
    AmountRange { min: f64, max: f64 },
    DepartmentMatch(Vec<String>),
}

impl RuleMatcher {
    pub fn compile(rule: &FilterRule) -> Result<Self, GrantError> {
        match &rule.kind {
            RuleKind::Include => Ok(Self::Include(keyword_list(rule)?)),
            RuleKind::Exclude => Ok(Self::Exclude(keyword_list(rule)?)),
            RuleKind::DepartmentMatch => Ok(Self::DepartmentMatch(keyword_list(rule)?)),
            RuleKind::Regex => {
                let pattern = rule.value.as_str().ok_or_else(|| {
                    GrantError::Validation(format!("rule '{}': regex value must be a string", rule.name))
                })?;
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(Self::Regex)
                    .map_err(|e| GrantError::Validation(format!("rule '{}': invalid regex: {}", rule.name, e)))
            }
            RuleKind::AmountRange => {
                let (min, max) = amount_bounds(rule)?;
                Ok(Self::AmountRange { min, max })
            }
            RuleKind::Unknown(kind) => Err(GrantError::Validation(format!(
                "rule '{}': unknown rule kind '{}'",
                rule.name, kind
            ))),
        }
    }

    pub fn score(&self, hay: &Haystack, amounts: &[f64]) -> RuleScore {
        match self {
            Self::Include(keywords) => {
                let hits = hay.keyword_hits(keywords);
                if keywords.is_empty() {
                    return RuleScore::fail();
                }
                RuleScore {
                    passed: !hits.is_empty(),
                    score: hits.len() as f64 / keywords.len() as f64,
                    matches: owned(hits),
                }
            }
            Self::Exclude(keywords) => {
                let hits = hay.keyword_hits(keywords);
                let clean = hits.is_empty();
                RuleScore {
                    passed: clean,
                    score: if clean { 1.0 } else { 0.0 },
                    matches: owned(hits),
                }
            }
            Self::Regex(re) => {
                let matches: Vec<String> = re.find_iter(&hay.lowered).map(|m| m.as_str().to_string()).collect();
                RuleScore {
                    passed: !matches.is_empty(),
                    score: (matches.len() as f64 / 3.0).min(1.0),
                    matches,
                }
            }
            Self::AmountRange { min, max } => {
                match amounts.iter().copied().find(|a| *a >= *min && *a <= *max) {
                    Some(amount) => RuleScore {
                        passed: true,
                        score: range_score(amount, *min, *max),
                        matches: vec![format!("{amount}")],
                    },
                    None => RuleScore::fail(),
                }
            }
            Self::DepartmentMatch(names) => {
                if names.is_empty() {
                    return RuleScore::fail();
                }
                let hits: Vec<&str> = names
                    .iter()
                    .filter(|n| {
                        let needle = super::text::fold(n.trim());
                        !needle.is_empty() && hay.department.contains(&needle)
                    })
                    .map(String::as_str)
                    .collect();
                RuleScore {
                    passed: !hits.is_empty(),
                    score: hits.len() as f64 / names.len() as f64,
                    matches: owned(hits),
                }
            }
        }
    }
}

/// Peaks at the midpoint, decays linearly toward the edges, floor 0.3.
/// Unbounded or degenerate ranges score 1.0.
fn range_score(amount: f64, min: f64, max: f64) -> f64 {
    let width = max - min;
    if !width.is_finite() || width <= 0.0 {
        return 1.0;
    }
    let mid = (min + max) / 2.0;
    (1.0 - (amount - mid).abs() / width).max(0.3)
}

fn owned(hits: Vec<&str>) -> Vec<String> {
    hits.into_iter().map(str::to_string).collect()
}

fn keyword_list(rule: &FilterRule) -> Result<Vec<String>, GrantError> {
    match &rule.value {
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    GrantError::Validation(format!("rule '{}': keyword lists must contain strings", rule.name))
                })
            })
            .collect(),
        Value::String(single) => Ok(vec![single.clone()]),
        _ => Err(GrantError::Validation(format!(
            "rule '{}': expected a keyword list",
            rule.name
        ))),
    }
}

fn amount_bounds(rule: &FilterRule) -> Result<(f64, f64), GrantError> {
    let obj = rule.value.as_object().ok_or_else(|| {
        GrantError::Validation(format!("rule '{}': amount range must be an object", rule.name))
    })?;
    let bound = |key: &str, default: f64| -> Result<f64, GrantError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| {
                GrantError::Validation(format!("rule '{}': '{}' must be a number", rule.name, key))
            }),
        }
    };
    let min = bound("min", 0.0)?;
    let max = bound("max", f64::INFINITY)?;
    if min > max {
        return Err(GrantError::Validation(format!(
            "rule '{}': min {} greater than max {}",
            rule.name, min, max
        )));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hay(text: &str) -> Haystack {
        Haystack::new([text], "")
    }

    #[test]
    fn include_scores_fraction_found() {
        let rule = FilterRule::keywords("k", RuleKind::Include, &["fundación", "asociación", "ong", "tercer sector"]);
        let m = RuleMatcher::compile(&rule).unwrap();
        let s = m.score(&hay("Ayudas a fundaciones y asociaciones"), &[]);
        assert!(s.passed);
        assert_eq!(s.score, 0.5);
        assert_eq!(s.matches, vec!["fundación", "asociación"]);
    }

    #[test]
    fn exclude_is_hard_negative() {
        let rule = FilterRule::keywords("x", RuleKind::Exclude, &["sociedad anónima"]);
        let m = RuleMatcher::compile(&rule).unwrap();
        assert_eq!(m.score(&hay("para sociedad anonima"), &[]).score, 0.0);
        let clean = m.score(&hay("para fundaciones"), &[]);
        assert!(clean.passed);
        assert_eq!(clean.score, 1.0);
    }

    #[test]
    fn regex_saturates_at_three_matches() {
        let rule = FilterRule::new("r", RuleKind::Regex, json!(r"ayuda\w*"));
        let m = RuleMatcher::compile(&rule).unwrap();
        let one = m.score(&hay("Ayuda directa"), &[]);
        assert!((one.score - 1.0 / 3.0).abs() < 1e-9);
        let many = m.score(&hay("ayuda ayudas ayudar ayudante"), &[]);
        assert_eq!(many.score, 1.0);
    }

    #[test]
    fn invalid_regex_fails_to_compile() {
        let rule = FilterRule::new("bad", RuleKind::Regex, json!("(unclosed"));
        let err = RuleMatcher::compile(&rule).unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn amount_range_peaks_at_midpoint() {
        let rule = FilterRule::new("a", RuleKind::AmountRange, json!({"min": 0, "max": 100}));
        let m = RuleMatcher::compile(&rule).unwrap();
        assert_eq!(m.score(&hay(""), &[50.0]).score, 1.0);
        assert_eq!(m.score(&hay(""), &[100.0]).score, 0.5);
        assert_eq!(m.score(&hay(""), &[75.0]).score, 0.75);
        assert!(!m.score(&hay(""), &[150.0]).passed);
        assert!(!m.score(&hay(""), &[]).passed);
    }

    #[test]
    fn amount_range_uses_first_in_range_amount() {
        let rule = FilterRule::new("a", RuleKind::AmountRange, json!({"min": 0, "max": 100}));
        let m = RuleMatcher::compile(&rule).unwrap();
        let s = m.score(&hay(""), &[500.0, 100.0, 50.0]);
        assert!(s.passed);
        assert_eq!(s.score, 0.5);
    }

    #[test]
    fn unbounded_range_scores_full() {
        let rule = FilterRule::new("a", RuleKind::AmountRange, json!({"min": 1000}));
        let m = RuleMatcher::compile(&rule).unwrap();
        assert_eq!(m.score(&hay(""), &[5_000_000.0]).score, 1.0);
    }

    #[test]
    fn inverted_range_is_invalid() {
        let rule = FilterRule::new("a", RuleKind::AmountRange, json!({"min": 10, "max": 1}));
        assert!(RuleMatcher::compile(&rule).is_err());
    }

    #[test]
    fn department_match_only_looks_at_department() {
        let rule = FilterRule::keywords("d", RuleKind::DepartmentMatch, &["Ministerio de Cultura", "Igualdad"]);
        let m = RuleMatcher::compile(&rule).unwrap();
        let dept = Haystack::new(["Ministerio de Cultura y Deporte"], "Ministerio de Cultura y Deporte");
        let s = m.score(&dept, &[]);
        assert!(s.passed);
        assert_eq!(s.score, 0.5);

        let title_only = Haystack::new(["Igualdad"], "Ministerio de Hacienda");
        assert!(!m.score(&title_only, &[]).passed);
    }

    #[test]
    fn unknown_kind_and_wrong_shape_fail_to_compile() {
        let unknown = FilterRule::new("s", RuleKind::Unknown("sector".into()), json!(["x"]));
        assert!(RuleMatcher::compile(&unknown).is_err());
        let wrong = FilterRule::new("k", RuleKind::Include, json!({"a": 1}));
        assert!(RuleMatcher::compile(&wrong).is_err());
    }
}
