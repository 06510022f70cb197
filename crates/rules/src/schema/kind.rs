//! Rule kind enum, the closed set the evaluator dispatches on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported filter rule kinds.
///
/// Unrecognized names deserialize into [`RuleKind::Unknown`] so a profile
/// document with one bad rule still loads; that rule scores 0 at evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleKind {
    Include,
    Exclude,
    Regex,
    AmountRange,
    DepartmentMatch,
    Unknown(String),
}

impl RuleKind {
    pub fn as_str(&self) -> &str {
        match self {
            RuleKind::Include => "include",
            RuleKind::Exclude => "exclude",
            RuleKind::Regex => "regex",
            RuleKind::AmountRange => "amount_range",
            RuleKind::DepartmentMatch => "department_match",
            RuleKind::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RuleKind::Unknown(_))
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match RuleKind::from(s.to_string()) {
            RuleKind::Unknown(other) => Err(format!("unknown rule kind: '{}'", other)),
            kind => Ok(kind),
        }
    }
}

impl From<String> for RuleKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "include" => RuleKind::Include,
            "exclude" => RuleKind::Exclude,
            "regex" => RuleKind::Regex,
            "amount" | "amount_range" => RuleKind::AmountRange,
            "department" | "department_match" => RuleKind::DepartmentMatch,
            _ => RuleKind::Unknown(s),
        }
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.as_str().to_string()
    }
}
