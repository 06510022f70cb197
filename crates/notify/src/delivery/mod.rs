//! Webhook delivery with scheduled retries.
//!
//! Per grant: `PENDING → SUCCESS | RETRYING → … → SUCCESS | FAILED`.
//! Every attempt is appended to the delivery log; retries are picked up by
//! [`DeliveryService::sweep`], never slept on in-line.
//!
//! Per-grant failures come back as [`DeliveryOutcome`] values. Nothing in
//! this module returns `Err` for a single grant except
//! [`DeliveryService::handle_callback`].

mod classify;


use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use grantflow_core::{
    AttemptFilter, AttemptStatus, DeliveryAttempt, DeliveryStats, ExportMarkers, ExportStatus, Grant, GrantError,
    Result, Trigger,
};
use grantflow_storage::{DeliveryLog, GrantStore};

use crate::backoff::RetryPolicy;
use crate::payload::build_payload;
use crate::templating::SummaryRenderer;
use crate::traits::WebhookClient;

// ── Outcomes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Delivered,
    Retrying,
    Failed,
    AlreadyDelivered,
    NotFound,
    StoreError,
    /// Another delivery of the same grant moved its chain on first; nothing sent.
    Superseded,
}

/// Result of one delivery request for one grant.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub grant_id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<DeliveryAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeliveryOutcome {
    fn bare(grant_id: &str, status: OutcomeStatus, message: Option<String>) -> Self {
        Self { grant_id: grant_id.to_string(), status, attempt: None, message }
    }

    fn store_error(grant_id: &str, e: GrantError) -> Self {
        warn!(grant = grant_id, error = %e, "delivery store operation failed");
        Self::bare(grant_id, OutcomeStatus::StoreError, Some(e.to_string()))
    }

    fn from_attempt(attempt: DeliveryAttempt) -> Self {
        let status = match attempt.status {
            AttemptStatus::Success => OutcomeStatus::Delivered,
            AttemptStatus::Retrying => OutcomeStatus::Retrying,
            AttemptStatus::Failed | AttemptStatus::Pending => OutcomeStatus::Failed,
        };
        Self {
            grant_id: attempt.grant_id.clone(),
            status,
            message: attempt.error_message.clone(),
            attempt: Some(attempt),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.status == OutcomeStatus::Delivered
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed | OutcomeStatus::NotFound | OutcomeStatus::StoreError)
    }
}

/// Per-item results of a multi-grant operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Scheduled for a sweep retry.
    pub retrying: usize,
    /// Already forwarded, nothing sent.
    pub skipped: usize,
    pub results: Vec<DeliveryOutcome>,
}

impl BatchReport {
    fn from_outcomes(results: Vec<DeliveryOutcome>) -> Self {
        let mut report = Self { total: results.len(), ..Self::default() };
        for outcome in &results {
            match outcome.status {
                OutcomeStatus::Delivered => report.successful += 1,
                OutcomeStatus::Retrying => report.retrying += 1,
                OutcomeStatus::AlreadyDelivered | OutcomeStatus::Superseded => report.skipped += 1,
                OutcomeStatus::Failed | OutcomeStatus::NotFound | OutcomeStatus::StoreError => report.failed += 1,
            }
        }
        report.results = results;
        report
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Due retries found.
    pub due: usize,
    /// Never-attempted grants picked up.
    pub caught_up: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    pub results: Vec<DeliveryOutcome>,
}

// ── Callback ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Error,
}

/// Export report posted back by the downstream workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryCallback {
    pub grant_id: String,
    pub status: CallbackStatus,
    #[serde(default, alias = "external_row_id")]
    pub row_id: Option<String>,
    #[serde(default, alias = "external_url")]
    pub sheets_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ── Service ─────────────────────────────────────────────────────────

/// One async lock per grant id. Sequence and attempt numbers are read and
/// the attempt is appended under the same guard, so two sends of one grant
/// never share a slot within a process.
#[derive(Default)]
struct GrantLocks(Mutex<HashMap<String, Arc<AsyncMutex<()>>>>);

impl GrantLocks {
    async fn acquire(&self, grant_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.0.lock().expect("grant locks poisoned");
            // Entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(grant_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct DeliveryService {
    client: Arc<dyn WebhookClient>,
    grants: Arc<dyn GrantStore>,
    log: Arc<dyn DeliveryLog>,
    renderer: SummaryRenderer,
    policy: RetryPolicy,
    concurrency: usize,
    catch_up: bool,
    locks: GrantLocks,
}

impl DeliveryService {
    pub fn new(client: Arc<dyn WebhookClient>, grants: Arc<dyn GrantStore>, log: Arc<dyn DeliveryLog>) -> Self {
        Self {
            client,
            grants,
            log,
            renderer: SummaryRenderer::new(),
            policy: RetryPolicy::default(),
            concurrency: 4,
            catch_up: true,
            locks: GrantLocks::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default parallelism for batches and sweeps.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Whether sweeps also pick up grants that were never attempted.
    pub fn with_catch_up(mut self, enabled: bool) -> Self {
        self.catch_up = enabled;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver one grant. Continues a pending retry chain instead of
    /// opening a new one.
    pub async fn deliver(&self, grant_id: &str, trigger: Trigger) -> DeliveryOutcome {
        let _guard = self.locks.acquire(grant_id).await;
        let grant = match self.load(grant_id).await {
            Ok(grant) => grant,
            Err(outcome) => return outcome,
        };
        if grant.forwarded {
            return DeliveryOutcome::bare(grant_id, OutcomeStatus::AlreadyDelivered, None);
        }

        let (sequence, attempt_number) = match self.log.latest_for(grant_id).await {
            Ok(Some(latest)) if latest.status == AttemptStatus::Retrying => {
                (latest.sequence, latest.attempt_number + 1)
            }
            Ok(_) => match self.log.next_sequence(grant_id).await {
                Ok(sequence) => (sequence, 1),
                Err(e) => return DeliveryOutcome::store_error(grant_id, e),
            },
            Err(e) => return DeliveryOutcome::store_error(grant_id, e),
        };
        self.attempt(&grant, sequence, attempt_number, trigger).await
    }

    /// One send: build, post, classify, append, and mark forwarded on 2xx.
    ///
    /// Does not take the grant lock; callers pick `sequence` and
    /// `attempt_number` and keep them unique.
    pub async fn attempt(&self, grant: &Grant, sequence: u32, attempt_number: u32, trigger: Trigger) -> DeliveryOutcome {
        let mut attempt = DeliveryAttempt::new(&grant.id, sequence, attempt_number, trigger);

        let started = Instant::now();
        let result = match build_payload(grant, &self.renderer) {
            Ok(payload) => self.client.post(&payload).await,
            Err(e) => Err(e),
        };
        attempt.latency_ms = Some(started.elapsed().as_millis() as u64);
        classify::settle(&mut attempt, result, &self.policy, Utc::now());

        if let Err(e) = self.log.append(&attempt).await {
            return DeliveryOutcome::store_error(&grant.id, e);
        }

        match attempt.status {
            AttemptStatus::Success => {
                match self.grants.mark_forwarded(&grant.id, attempt.id, attempt.sent_at.unwrap_or_else(Utc::now)).await {
                    Ok(true) => info!(grant = %grant.id, sequence, attempt = attempt_number, "grant delivered"),
                    Ok(false) => debug!(grant = %grant.id, "grant was already marked forwarded"),
                    Err(e) => return DeliveryOutcome::store_error(&grant.id, e),
                }
            }
            AttemptStatus::Retrying => warn!(
                grant = %grant.id,
                sequence,
                attempt = attempt_number,
                error = attempt.error_message.as_deref().unwrap_or_default(),
                next_retry_at = ?attempt.next_retry_at,
                "delivery failed, retry scheduled"
            ),
            _ => warn!(
                grant = %grant.id,
                sequence,
                attempt = attempt_number,
                kind = attempt.error_kind.map(|k| k.as_str()).unwrap_or_default(),
                error = attempt.error_message.as_deref().unwrap_or_default(),
                "delivery failed"
            ),
        }
        DeliveryOutcome::from_attempt(attempt)
    }

    /// Re-attempt due retries, then forward never-attempted grants.
    pub async fn sweep(&self, now: DateTime<Utc>, limit: usize) -> SweepReport {
        let due = match self.log.due_retries(now, limit).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "could not list due retries");
                Vec::new()
            }
        };

        let mut report = SweepReport { due: due.len(), ..SweepReport::default() };
        let mut results: Vec<DeliveryOutcome> = stream::iter(due)
            .map(|latest| self.continue_chain(latest))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let room = limit.saturating_sub(report.due);
        if self.catch_up && room > 0 {
            match self.grants.pending_forward(room).await {
                Ok(pending) => {
                    report.caught_up = pending.len();
                    let caught: Vec<DeliveryOutcome> = stream::iter(pending)
                        .map(|grant| async move { self.catch_up(&grant.id).await })
                        .buffer_unordered(self.concurrency)
                        .collect()
                        .await;
                    results.extend(caught);
                }
                Err(e) => warn!(error = %e, "could not list unforwarded grants"),
            }
        }

        for outcome in &results {
            match outcome.status {
                OutcomeStatus::Delivered => report.delivered += 1,
                OutcomeStatus::Retrying => report.retrying += 1,
                _ if outcome.is_failure() => report.failed += 1,
                _ => {}
            }
        }
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
        report.results = results;
        report
    }

    async fn continue_chain(&self, due: DeliveryAttempt) -> DeliveryOutcome {
        let _guard = self.locks.acquire(&due.grant_id).await;
        let grant = match self.load(&due.grant_id).await {
            Ok(grant) => grant,
            Err(outcome) => return outcome,
        };
        if grant.forwarded {
            return DeliveryOutcome::bare(&grant.id, OutcomeStatus::AlreadyDelivered, None);
        }
        match self.log.latest_for(&grant.id).await {
            Ok(Some(latest)) if latest.sequence == due.sequence && latest.attempt_number == due.attempt_number => {
                self.attempt(&grant, latest.sequence, latest.attempt_number + 1, Trigger::Sweep).await
            }
            Ok(_) => {
                debug!(grant = %grant.id, "retry chain advanced elsewhere, skipping");
                DeliveryOutcome::bare(&grant.id, OutcomeStatus::Superseded, None)
            }
            Err(e) => DeliveryOutcome::store_error(&grant.id, e),
        }
    }

    /// First attempt for a grant the log has never seen.
    async fn catch_up(&self, grant_id: &str) -> DeliveryOutcome {
        let _guard = self.locks.acquire(grant_id).await;
        let grant = match self.load(grant_id).await {
            Ok(grant) => grant,
            Err(outcome) => return outcome,
        };
        if grant.forwarded {
            return DeliveryOutcome::bare(grant_id, OutcomeStatus::AlreadyDelivered, None);
        }
        match self.log.latest_for(grant_id).await {
            Ok(None) => self.first_attempt(&grant, Trigger::Sweep).await,
            Ok(Some(_)) => DeliveryOutcome::bare(grant_id, OutcomeStatus::Superseded, None),
            Err(e) => DeliveryOutcome::store_error(grant_id, e),
        }
    }

    async fn first_attempt(&self, grant: &Grant, trigger: Trigger) -> DeliveryOutcome {
        match self.log.next_sequence(&grant.id).await {
            Ok(sequence) => self.attempt(grant, sequence, 1, trigger).await,
            Err(e) => DeliveryOutcome::store_error(&grant.id, e),
        }
    }

    /// Deliver many grants with at most `concurrency` in flight. One item's
    /// failure never affects another.
    pub async fn deliver_batch(&self, ids: &[String], concurrency: Option<usize>) -> BatchReport {
        self.deliver_many(ids, concurrency.unwrap_or(self.concurrency), Trigger::Batch).await
    }

    /// Forward grants a capture run just created.
    pub async fn forward_captured(&self, ids: &[String]) -> BatchReport {
        self.deliver_many(ids, self.concurrency, Trigger::Auto).await
    }

    /// Repeated ids are delivered once.
    async fn deliver_many(&self, ids: &[String], concurrency: usize, trigger: Trigger) -> BatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        let results = stream::iter(unique.into_iter().cloned())
            .map(|id| async move { self.deliver(&id, trigger).await })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        BatchReport::from_outcomes(results)
    }

    /// Operator resend: always a fresh sequence at attempt 1. A delivered
    /// grant is only resent with `force`, and is never re-marked.
    pub async fn resend(&self, grant_id: &str, force: bool) -> DeliveryOutcome {
        let _guard = self.locks.acquire(grant_id).await;
        let grant = match self.load(grant_id).await {
            Ok(grant) => grant,
            Err(outcome) => return outcome,
        };
        if grant.forwarded && !force {
            return DeliveryOutcome::bare(
                grant_id,
                OutcomeStatus::AlreadyDelivered,
                Some("grant already delivered; use force to resend".into()),
            );
        }
        self.first_attempt(&grant, Trigger::Resend).await
    }

    /// Resend grants whose latest attempt failed terminally.
    pub async fn retry_failed(&self, limit: usize) -> BatchReport {
        let failed = match self.log.latest_failed(limit).await {
            Ok(failed) => failed,
            Err(e) => {
                warn!(error = %e, "could not list failed deliveries");
                return BatchReport::default();
            }
        };
        let results = stream::iter(failed)
            .map(|attempt| async move { self.resend(&attempt.grant_id, false).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        BatchReport::from_outcomes(results)
    }

    pub async fn stats(&self) -> Result<DeliveryStats> {
        self.log.stats(Utc::now()).await
    }

    pub async fn history(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
        self.log.history(filter).await
    }

    /// Record the downstream export outcome. Forwarded markers are never
    /// touched: an export error leaves the grant delivered but not exported.
    pub async fn handle_callback(&self, callback: &DeliveryCallback) -> Result<ExportMarkers> {
        let grant = self
            .grants
            .get(&callback.grant_id)
            .await?
            .ok_or_else(|| GrantError::NotFound(format!("grant {}", callback.grant_id)))?;

        let markers = match callback.status {
            CallbackStatus::Success => ExportMarkers {
                export_status: ExportStatus::Exported,
                external_row_id: callback.row_id.clone(),
                external_url: callback.sheets_url.clone(),
                export_error: None,
                exported_at: Some(Utc::now()),
            },
            CallbackStatus::Error => ExportMarkers {
                export_status: ExportStatus::ExportFailed,
                export_error: Some(
                    callback.error_message.clone().unwrap_or_else(|| "export failed without details".into()),
                ),
                ..grant.export.clone()
            },
        };
        self.grants.set_export(&grant.id, &markers).await?;
        info!(grant = %grant.id, status = markers.export_status.as_str(), "export callback recorded");
        Ok(markers)
    }

    async fn load(&self, grant_id: &str) -> std::result::Result<Grant, DeliveryOutcome> {
        match self.grants.get(grant_id).await {
            Ok(Some(grant)) => Ok(grant),
            Ok(None) => Err(DeliveryOutcome::bare(grant_id, OutcomeStatus::NotFound, Some(format!("grant {grant_id} not found")))),
            Err(e) => Err(DeliveryOutcome::store_error(grant_id, e)),
        }
    }
}
