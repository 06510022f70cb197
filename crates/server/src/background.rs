//! Background loops started by `serve`.
//!
//! - The delivery sweep runs on a fixed `tokio::time::interval` and re-attempts
//!   due retries (plus never-attempted grants when auto-forward is on).
//! - Each `CAPTURE_SCHEDULE_{BOE,BDNS,PLACSP}` cron expression drives a capture
//!   loop that sleeps until the next fire time.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use grantflow_core::Source;
use grantflow_ingest::CaptureRequest;

use crate::state::AppState;

/// Spawn the sweep loop. `None` when delivery is not configured.
pub fn spawn_sweep_loop(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let delivery = Arc::clone(state.delivery.as_ref()?);
    let every = Duration::from_secs(state.config.delivery.sweep_interval_secs.max(1));
    let limit = state.config.delivery.sweep_limit;

    info!("delivery sweep started (interval: {}s, limit: {})", every.as_secs(), limit);

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = delivery.sweep(Utc::now(), limit).await;
            if report.due + report.caught_up > 0 {
                info!(
                    due = report.due,
                    caught_up = report.caught_up,
                    delivered = report.delivered,
                    retrying = report.retrying,
                    failed = report.failed,
                    "delivery sweep finished"
                );
            }
        }
    }))
}

/// Spawn one capture loop per valid schedule. Invalid entries are skipped
/// with a warning.
pub fn spawn_capture_schedules(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for (prefix, expr) in &state.config.filters.schedules {
        let source = match Source::from_str(prefix) {
            Ok(source) => source,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "scheduler: unknown source, skipping");
                continue;
            }
        };
        let schedule = match parse_cron(expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(source = %source, cron = %expr, error = %e, "scheduler: invalid cron expression, skipping");
                continue;
            }
        };

        info!(source = %source, cron = %expr, "scheduled capture registered");
        handles.push(tokio::spawn(run_schedule(Arc::clone(&state), source, schedule)));
    }
    handles
}

async fn run_schedule(state: Arc<AppState>, source: Source, schedule: Schedule) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(source = %source, "scheduler: schedule has no upcoming fire time, stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        info!(source = %source, trigger = "scheduled", "scheduler: starting capture");
        match state.capture(source, &CaptureRequest::default()).await {
            Ok(outcome) => info!(
                source = %source,
                new = outcome.stats.new,
                updated = outcome.stats.updated,
                rejected = outcome.stats.rejected,
                "scheduled capture finished"
            ),
            Err(e) => warn!(source = %source, error = %e, "scheduled capture failed"),
        }
    }
}

/// Parse a cron expression, accepting both the standard 5-field form and the
/// 6/7-field form with seconds.
fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn five_field_expression_gets_seconds() {
        let schedule = parse_cron("30 6 * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (6, 30, 0));
    }

    #[test]
    fn six_field_expression_is_used_as_is() {
        let schedule = parse_cron("15 0 * * * *").unwrap();
        assert_eq!(schedule.upcoming(Utc).next().unwrap().second(), 15);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_cron("every morning").is_err());
    }
}
