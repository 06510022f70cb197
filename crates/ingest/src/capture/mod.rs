//! Capture orchestrator.
//!
//! One run drives one adapter page by page:
//! `FETCH_PAGE → NORMALIZE → SCORE → ACCEPT|REJECT → PERSIST → next page | STOP`.
//!
//! Per-record failures (malformed record, persistence error) are counted and
//! skipped. A page fetch failure aborts the run; everything persisted before
//! it stays.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use grantflow_core::dates::parse_timestamp;
use grantflow_core::{Grant, GrantDraft, GrantError, RawRecord, Result, Source};
use grantflow_rules::{evaluate_compiled, CompiledProfile, EvaluationInput, ProfileStore};
use grantflow_storage::GrantStore;

use crate::enrich::Enricher;
use crate::normalize::Normalizer;
use crate::source::{FetchWindow, SourceAdapter};

#[cfg(test)]
mod tests;

/// Consecutive pages without a fresh record that end a scan.
pub const STALE_PAGE_LIMIT: u32 = 2;

// ── Request ─────────────────────────────────────────────────────────

/// Parameters of one capture run. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Profile names; empty means the source's configured defaults.
    #[serde(default)]
    pub profiles: Vec<String>,
}

impl CaptureRequest {
    /// Explicit dates win; otherwise `lookback_days` (or the source default)
    /// back from `to`, which defaults to today.
    pub fn window(&self, source: Source, today: NaiveDate) -> FetchWindow {
        let to = self.to.unwrap_or(today);
        match self.from {
            Some(from) => FetchWindow::new(from, to),
            None => FetchWindow::lookback(self.lookback_days.unwrap_or_else(|| default_lookback(source)), to),
        }
    }
}

/// Days looked back when a request names no window.
pub fn default_lookback(source: Source) -> u32 {
    match source {
        Source::Gazette => 0,
        Source::SubsidyDb => 7,
        Source::Procurement => 1,
    }
}

// ── Stats ───────────────────────────────────────────────────────────

/// Counters of one run.
///
/// `accepted == new + updated + skipped_unchanged + persist_errors` and
/// `total_fetched == accepted + rejected + malformed` hold at every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub source: Source,
    pub total_fetched: usize,
    pub accepted: usize,
    /// Filter rejections plus stale records.
    pub rejected: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped_unchanged: usize,
    /// Malformed records plus persistence failures.
    pub errors: usize,
    pub malformed: usize,
    pub stale: usize,
    pub persist_errors: usize,
    pub pages: u32,
    pub new_grant_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

impl CaptureStats {
    fn new(source: Source, started_at: DateTime<Utc>) -> Self {
        Self {
            source,
            total_fetched: 0,
            accepted: 0,
            rejected: 0,
            new: 0,
            updated: 0,
            skipped_unchanged: 0,
            errors: 0,
            malformed: 0,
            stale: 0,
            persist_errors: 0,
            pages: 0,
            new_grant_ids: Vec::new(),
            started_at,
            finished_at: None,
            cancelled: false,
        }
    }

    /// Both counter invariants hold.
    pub fn is_consistent(&self) -> bool {
        self.accepted == self.new + self.updated + self.skipped_unchanged + self.persist_errors
            && self.total_fetched == self.accepted + self.rejected + self.malformed
    }
}

/// What persisting one accepted draft did.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Persisted {
    New(String),
    Updated,
    Unchanged,
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct CaptureOrchestrator {
    adapter: Arc<dyn SourceAdapter>,
    normalizer: Arc<dyn Normalizer>,
    store: Arc<dyn GrantStore>,
    profiles: Arc<ProfileStore>,
    default_profiles: Vec<String>,
    enricher: Option<Arc<dyn Enricher>>,
    cancel: Arc<AtomicBool>,
    max_pages: u32,
    max_results: usize,
}

impl CaptureOrchestrator {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        normalizer: Arc<dyn Normalizer>,
        store: Arc<dyn GrantStore>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        Self {
            adapter,
            normalizer,
            store,
            profiles,
            default_profiles: Vec::new(),
            enricher: None,
            cancel: Arc::new(AtomicBool::new(false)),
            max_pages: 10,
            max_results: 500,
        }
    }

    /// Profiles scored when a request names none. Empty means all.
    pub fn with_default_profiles(mut self, names: Vec<String>) -> Self {
        self.default_profiles = names;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Default page and result caps; a request may lower or raise them.
    pub fn with_limits(mut self, max_pages: u32, max_results: usize) -> Self {
        self.max_pages = max_pages;
        self.max_results = max_results;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag checked between records and pages. The in-flight record completes.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn source(&self) -> Source {
        self.adapter.source()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub async fn run(&self, request: &CaptureRequest) -> Result<CaptureStats> {
        let source = self.adapter.source();
        let mut stats = CaptureStats::new(source, Utc::now());

        let window = request.window(source, stats.started_at.date_naive());
        let cutoff = window.cutoff();
        let max_pages = request.max_pages.unwrap_or(self.max_pages);
        let max_results = request.max_results.unwrap_or(self.max_results);

        let unknown = self.profiles.unknown(&request.profiles);
        if !unknown.is_empty() {
            return Err(GrantError::Validation(format!("unknown filter profiles: {}", unknown.join(", "))));
        }

        let names = if request.profiles.is_empty() { &self.default_profiles } else { &request.profiles };
        let snapshot = self.profiles.snapshot(names);
        if snapshot.is_empty() {
            warn!(source = %source, "no filter profiles selected, accepting every record");
        }
        let compiled: Vec<CompiledProfile<'_>> = snapshot.iter().map(CompiledProfile::compile).collect();

        info!(
            source = %source,
            from = %window.from,
            to = %window.to,
            profiles = snapshot.len(),
            max_pages,
            max_results,
            "capture started"
        );

        let mut cursor = Some(self.adapter.first_cursor(&window));
        let mut stale_pages = 0u32;

        'pages: while let Some(current) = cursor.take() {
            if self.cancelled() {
                stats.cancelled = true;
                break;
            }
            if stats.pages >= max_pages {
                debug!(source = %source, pages = stats.pages, "page limit reached");
                break;
            }

            let page = match self.adapter.fetch(&window, &current).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        source = %source,
                        cursor = ?current,
                        error = %e,
                        new = stats.new,
                        updated = stats.updated,
                        "page fetch failed, aborting capture"
                    );
                    return Err(e);
                }
            };
            stats.pages += 1;

            let mut fresh = 0usize;
            for raw in page.records {
                if self.cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }
                if stats.total_fetched >= max_results {
                    debug!(source = %source, max_results, "result limit reached");
                    break 'pages;
                }
                stats.total_fetched += 1;

                if self.is_stale(&raw, cutoff) {
                    stats.stale += 1;
                    stats.rejected += 1;
                    continue;
                }
                fresh += 1;
                self.process(&raw, &compiled, &mut stats).await;
            }

            if self.adapter.timestamp_key().is_some() {
                if fresh == 0 {
                    stale_pages += 1;
                    if stale_pages >= STALE_PAGE_LIMIT {
                        debug!(source = %source, stale_pages, "consecutive stale pages, stopping");
                        break;
                    }
                } else {
                    stale_pages = 0;
                }
            }

            cursor = page.next;
        }

        stats.finished_at = Some(Utc::now());
        info!(
            source = %source,
            pages = stats.pages,
            fetched = stats.total_fetched,
            accepted = stats.accepted,
            rejected = stats.rejected,
            new = stats.new,
            updated = stats.updated,
            unchanged = stats.skipped_unchanged,
            stale = stats.stale,
            errors = stats.errors,
            cancelled = stats.cancelled,
            "capture finished"
        );
        Ok(stats)
    }

    /// Timestamped before the window start. Records without a parseable
    /// timestamp are never stale.
    fn is_stale(&self, raw: &RawRecord, cutoff: DateTime<Utc>) -> bool {
        let Some(key) = self.adapter.timestamp_key() else {
            return false;
        };
        parse_timestamp(raw.str(key).as_deref(), key).is_some_and(|ts| ts < cutoff)
    }

    async fn process(&self, raw: &RawRecord, profiles: &[CompiledProfile<'_>], stats: &mut CaptureStats) {
        let mut draft = match self.normalizer.normalize(raw) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(source = %self.source(), error = %e, "skipping malformed record");
                stats.malformed += 1;
                stats.errors += 1;
                return;
            }
        };

        if !profiles.is_empty() {
            let multi = evaluate_compiled(&EvaluationInput::from_draft(&draft), profiles);
            if !multi.any_passed() {
                debug!(id = %draft.id(), best = multi.best_score, "rejected by filters");
                stats.rejected += 1;
                return;
            }
            draft.relevance_score = Some(multi.best_score);
            draft.matched_profile = multi.best_profile;
        }
        stats.accepted += 1;

        let id = draft.id();
        match self.persist(draft).await {
            Ok(Persisted::New(id)) => {
                stats.new += 1;
                stats.new_grant_ids.push(id);
            }
            Ok(Persisted::Updated) => stats.updated += 1,
            Ok(Persisted::Unchanged) => stats.skipped_unchanged += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "failed to persist grant");
                stats.persist_errors += 1;
                stats.errors += 1;
            }
        }
    }

    async fn persist(&self, draft: GrantDraft) -> Result<Persisted> {
        let id = draft.id();
        let now = Utc::now();

        if let Some(existing) = self.store.get(&id).await? {
            return self.merge(existing, draft, now).await;
        }

        let grant = Grant::from_draft(self.enrich(draft, None).await, now);
        match self.store.insert(&grant).await {
            Ok(()) => Ok(Persisted::New(id)),
            Err(GrantError::PersistenceConflict { .. }) => {
                debug!(id = %id, "concurrent insert, merging instead");
                let existing = self
                    .store
                    .get(&id)
                    .await?
                    .ok_or_else(|| GrantError::NotFound(id.clone()))?;
                self.merge(existing, grant.data, now).await
            }
            Err(e) => Err(e),
        }
    }

    async fn merge(&self, mut existing: Grant, draft: GrantDraft, now: DateTime<Utc>) -> Result<Persisted> {
        if !existing.should_update(&draft) {
            return Ok(Persisted::Unchanged);
        }
        let draft = self.enrich(draft, Some(&existing)).await;
        existing.apply_draft(draft, now);
        self.store.update(&existing).await?;
        Ok(Persisted::Updated)
    }

    /// Run the enricher when the grant has no enrichment text yet.
    async fn enrich(&self, mut draft: GrantDraft, existing: Option<&Grant>) -> GrantDraft {
        let Some(enricher) = &self.enricher else {
            return draft;
        };
        let already = draft.content_text.is_some() || existing.is_some_and(|g| g.data.content_text.is_some());
        if already || draft.document_url.is_none() {
            return draft;
        }
        if let Err(e) = enricher.enrich(&mut draft).await {
            warn!(id = %draft.id(), error = %e, "enrichment failed, keeping metadata only");
        }
        draft
    }
}
