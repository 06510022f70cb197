//! Aggregate statistics over a batch of evaluations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::evaluator::Evaluation;

const TOP_MATCH_THRESHOLD: f64 = 0.6;
const TOP_MATCH_LIMIT: usize = 10;

/// Bucket labels, upper bound inclusive.
pub const SCORE_BUCKETS: [&str; 5] = ["0-0.2", "0.2-0.4", "0.4-0.6", "0.6-0.8", "0.8-1.0"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePerformance {
    pub evaluated: usize,
    pub passed: usize,
    pub pass_rate: f64,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    pub profile: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStatistics {
    pub total_evaluated: usize,
    pub total_passed: usize,
    pub average_score: f64,
    pub profile_performance: IndexMap<String, ProfilePerformance>,
    pub score_distribution: IndexMap<String, usize>,
    pub top_matches: Vec<TopMatch>,
}

impl FilterStatistics {
    pub fn from_evaluations(evaluations: &[Evaluation]) -> Self {
        Self::collect(evaluations.iter().map(|e| (None, e)))
    }

    /// Same as [`from_evaluations`](Self::from_evaluations) with grant ids
    /// carried into `top_matches`.
    pub fn from_labeled(evaluations: &[(String, Evaluation)]) -> Self {
        Self::collect(evaluations.iter().map(|(id, e)| (Some(id.as_str()), e)))
    }

    fn collect<'a>(items: impl Iterator<Item = (Option<&'a str>, &'a Evaluation)>) -> Self {
        let mut stats = Self {
            score_distribution: SCORE_BUCKETS.iter().map(|b| (b.to_string(), 0)).collect(),
            ..Default::default()
        };
        let mut score_sum = 0.0;
        let mut per_profile: IndexMap<String, (usize, usize, f64)> = IndexMap::new();

        for (grant_id, eval) in items {
            let score = eval.total_score;
            stats.total_evaluated += 1;
            score_sum += score;
            if eval.passed {
                stats.total_passed += 1;
            }

            if let Some(count) = stats.score_distribution.get_mut(bucket(score)) {
                *count += 1;
            }

            let entry = per_profile.entry(eval.profile.clone()).or_default();
            entry.0 += 1;
            entry.2 += score;
            if eval.passed {
                entry.1 += 1;
            }

            if score > TOP_MATCH_THRESHOLD {
                stats.top_matches.push(TopMatch {
                    grant_id: grant_id.map(str::to_string),
                    profile: eval.profile.clone(),
                    score,
                });
            }
        }

        if stats.total_evaluated == 0 {
            return stats;
        }

        stats.average_score = round3(score_sum / stats.total_evaluated as f64);
        stats.profile_performance = per_profile
            .into_iter()
            .map(|(name, (evaluated, passed, sum))| {
                let perf = ProfilePerformance {
                    evaluated,
                    passed,
                    pass_rate: round3(passed as f64 / evaluated as f64),
                    average_score: round3(sum / evaluated as f64),
                };
                (name, perf)
            })
            .collect();

        stats.top_matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        stats.top_matches.truncate(TOP_MATCH_LIMIT);
        stats
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total_evaluated == 0 {
            0.0
        } else {
            self.total_passed as f64 / self.total_evaluated as f64
        }
    }
}

fn bucket(score: f64) -> &'static str {
    match score {
        s if s <= 0.2 => SCORE_BUCKETS[0],
        s if s <= 0.4 => SCORE_BUCKETS[1],
        s if s <= 0.6 => SCORE_BUCKETS[2],
        s if s <= 0.8 => SCORE_BUCKETS[3],
        _ => SCORE_BUCKETS[4],
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
