use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use grantflow_core::{ExportMarkers, Grant, GrantDraft, GrantError, RawRecord, Result, Source};
use grantflow_rules::ProfileStore;
use grantflow_storage::{GrantStore, MemoryStore};

use super::*;
use crate::enrich::{EnrichError, Enricher};
use crate::normalize::{GazetteNormalizer, ProcurementNormalizer};
use crate::source::gazette::parse_summary;
use crate::source::{Cursor, FetchWindow, SourceAdapter, SourcePage};

// ── Mocks ───────────────────────────────────────────────────────────

enum Script {
    Page(Vec<RawRecord>),
    Fail,
}

/// Serves pre-scripted pages in order, `Page(n)` cursors.
struct ScriptedAdapter {
    pages: Vec<Script>,
    calls: AtomicUsize,
    cancel_on_fetch: Option<Arc<AtomicBool>>,
}

impl ScriptedAdapter {
    fn new(pages: Vec<Script>) -> Self {
        Self { pages, calls: AtomicUsize::new(0), cancel_on_fetch: None }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source(&self) -> Source {
        Source::Procurement
    }

    fn first_cursor(&self, _window: &FetchWindow) -> Cursor {
        Cursor::Page(0)
    }

    fn timestamp_key(&self) -> Option<&'static str> {
        Some("updated")
    }

    async fn fetch(&self, _window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_fetch {
            flag.store(true, Ordering::SeqCst);
        }
        let Cursor::Page(n) = cursor else {
            panic!("unexpected cursor {cursor:?}");
        };
        let n = *n as usize;
        let next = (n + 1 < self.pages.len()).then(|| Cursor::Page(n as u32 + 1));
        match &self.pages[n] {
            Script::Page(records) => Ok(SourcePage { records: records.clone(), next }),
            Script::Fail => Err(GrantError::transport("PLACSP", "connection reset")),
        }
    }
}

/// Simulates a concurrent writer: every insert loses the race to a
/// version of the grant with a different status.
struct RacingStore {
    inner: MemoryStore,
}

#[async_trait]
impl GrantStore for RacingStore {
    async fn get(&self, id: &str) -> Result<Option<Grant>> {
        self.inner.get(id).await
    }

    async fn insert(&self, grant: &Grant) -> Result<()> {
        let mut winner = grant.clone();
        winner.data.is_open = !grant.data.is_open;
        self.inner.insert(&winner).await?;
        Err(GrantError::PersistenceConflict { id: grant.id.clone() })
    }

    async fn update(&self, grant: &Grant) -> Result<()> {
        self.inner.update(grant).await
    }

    async fn pending_forward(&self, limit: usize) -> Result<Vec<Grant>> {
        self.inner.pending_forward(limit).await
    }

    async fn mark_forwarded(&self, id: &str, attempt_id: Uuid, at: chrono::DateTime<Utc>) -> Result<bool> {
        self.inner.mark_forwarded(id, attempt_id, at).await
    }

    async fn set_export(&self, id: &str, export: &ExportMarkers) -> Result<()> {
        self.inner.set_export(id, export).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// One gazette issue served from an in-memory summary document.
struct SummaryAdapter {
    body: serde_json::Value,
}

#[async_trait]
impl SourceAdapter for SummaryAdapter {
    fn source(&self) -> Source {
        Source::Gazette
    }

    fn first_cursor(&self, window: &FetchWindow) -> Cursor {
        Cursor::Day(window.from)
    }

    fn timestamp_key(&self) -> Option<&'static str> {
        None
    }

    async fn fetch(&self, _window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage> {
        let Cursor::Day(day) = cursor else {
            panic!("unexpected cursor {cursor:?}");
        };
        Ok(SourcePage { records: parse_summary(&self.body, *day), next: None })
    }
}

/// Insert of one natural code fails with a storage error.
struct FlakyStore {
    inner: MemoryStore,
    failing_id: String,
}

#[async_trait]
impl GrantStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<Grant>> {
        self.inner.get(id).await
    }

    async fn insert(&self, grant: &Grant) -> Result<()> {
        if grant.id == self.failing_id {
            return Err(GrantError::Storage("disk full".into()));
        }
        self.inner.insert(grant).await
    }

    async fn update(&self, grant: &Grant) -> Result<()> {
        self.inner.update(grant).await
    }

    async fn pending_forward(&self, limit: usize) -> Result<Vec<Grant>> {
        self.inner.pending_forward(limit).await
    }

    async fn mark_forwarded(&self, id: &str, attempt_id: Uuid, at: chrono::DateTime<Utc>) -> Result<bool> {
        self.inner.mark_forwarded(id, attempt_id, at).await
    }

    async fn set_export(&self, id: &str, export: &ExportMarkers) -> Result<()> {
        self.inner.set_export(id, export).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

struct CountingEnricher {
    calls: AtomicUsize,
}

#[async_trait]
impl Enricher for CountingEnricher {
    async fn enrich(&self, draft: &mut GrantDraft) -> std::result::Result<bool, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        draft.content_text = Some("Presupuesto base de licitación 12.000,00 euros".into());
        Ok(true)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn fresh(code: &str, title: &str) -> RawRecord {
    RawRecord::from_value(json!({
        "folder_id": code,
        "title": title,
        "updated": Utc::now().to_rfc3339(),
    }))
    .unwrap()
}

fn stale(code: &str) -> RawRecord {
    RawRecord::from_value(json!({
        "folder_id": code,
        "title": "Suministro antiguo",
        "updated": (Utc::now() - Duration::days(30)).to_rfc3339(),
    }))
    .unwrap()
}

fn malformed() -> RawRecord {
    RawRecord::from_value(json!({ "title": "Servicio sin identificador" })).unwrap()
}

fn orchestrator(adapter: Arc<dyn SourceAdapter>, store: Arc<dyn GrantStore>) -> CaptureOrchestrator {
    CaptureOrchestrator::new(
        adapter,
        Arc::new(ProcurementNormalizer::new()),
        store,
        Arc::new(ProfileStore::with_defaults("unused-profiles.json")),
    )
    .with_default_profiles(vec!["test_placsp".into()])
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn counters_add_up() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        Script::Page(vec![
            fresh("EXP-1", "Suministro de papel"),
            fresh("EXP-2", "Festival de música"),
            malformed(),
        ]),
        Script::Page(vec![fresh("EXP-3", "Obra de urbanización"), stale("EXP-OLD")]),
    ]));
    let store = Arc::new(MemoryStore::new());

    let stats = orchestrator(adapter, store.clone()).run(&CaptureRequest::default()).await.unwrap();

    assert_eq!(stats.total_fetched, 5);
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.new, 2);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.pages, 2);
    assert!(stats.is_consistent());
    assert!(stats.finished_at.is_some());
    assert_eq!(stats.new_grant_ids, vec!["PLACSP-EXP-1", "PLACSP-EXP-3"]);

    let grants = store.grants();
    assert_eq!(grants.len(), 2);
    assert_eq!(grants[0].data.matched_profile.as_deref(), Some("test_placsp"));
    assert!(grants[0].data.relevance_score.unwrap() > 0.0);
    assert!(!grants[0].forwarded);
}

#[tokio::test]
async fn one_stale_page_continues_two_stop() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        Script::Page(vec![stale("A")]),
        Script::Page(vec![fresh("B", "Servicio de limpieza")]),
        Script::Page(vec![stale("C")]),
        Script::Page(vec![stale("D")]),
        Script::Page(vec![fresh("E", "Servicio de vigilancia")]),
    ]));
    let store = Arc::new(MemoryStore::new());

    let stats = orchestrator(adapter.clone(), store).run(&CaptureRequest::default()).await.unwrap();

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
    assert_eq!(stats.pages, 4);
    assert_eq!(stats.new, 1);
    assert_eq!(stats.stale, 3);
    assert!(stats.is_consistent());
}

#[tokio::test]
async fn fetch_failure_aborts_but_keeps_earlier_records() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        Script::Page(vec![fresh("A", "Suministro de mobiliario")]),
        Script::Fail,
        Script::Page(vec![fresh("B", "Suministro de vehículos")]),
    ]));
    let store = Arc::new(MemoryStore::new());

    let err = orchestrator(adapter, store.clone()).run(&CaptureRequest::default()).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(store.get("PLACSP-A").await.unwrap().is_some());
}

#[tokio::test]
async fn insert_conflict_is_merged() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![Script::Page(vec![fresh("A", "Contrato de servicios")])]));
    let store = Arc::new(RacingStore { inner: MemoryStore::new() });

    let stats = orchestrator(adapter, store.clone()).run(&CaptureRequest::default()).await.unwrap();

    assert_eq!(stats.new, 0);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.persist_errors, 0);
    assert!(stats.is_consistent());
    let grant = store.get("PLACSP-A").await.unwrap().unwrap();
    assert!(grant.data.is_open);
}

#[tokio::test]
async fn store_failure_is_counted_and_the_run_continues() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![Script::Page(vec![
        fresh("A", "Suministro de papel"),
        fresh("B", "Suministro de tóner"),
        fresh("C", "Servicio de limpieza"),
    ])]));
    let store = Arc::new(FlakyStore { inner: MemoryStore::new(), failing_id: "PLACSP-B".into() });

    let stats = orchestrator(adapter, store.clone()).run(&CaptureRequest::default()).await.unwrap();

    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.new, 2);
    assert_eq!(stats.persist_errors, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.new_grant_ids, vec!["PLACSP-A", "PLACSP-C"]);
    assert!(stats.is_consistent());
    assert!(store.get("PLACSP-C").await.unwrap().is_some());
    assert!(store.get("PLACSP-B").await.unwrap().is_none());
}

#[tokio::test]
async fn gazette_item_without_identifier_is_malformed() {
    let body = json!({"data": {"sumario": {"diario": {"seccion": {
        "nombre": "III. Otras disposiciones",
        "departamento": {"nombre": "MINISTERIO DE CULTURA", "item": [
            {"identificador": "BOE-A-2024-7001", "titulo": "Resolución por la que se convocan subvenciones a fundaciones"},
            {"titulo": "Extracto de la convocatoria de subvenciones para festivales"}
        ]}
    }}}}});
    let orchestrator = CaptureOrchestrator::new(
        Arc::new(SummaryAdapter { body }),
        Arc::new(GazetteNormalizer::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(ProfileStore::new("unused-profiles.json")),
    );

    let stats = orchestrator.run(&CaptureRequest::default()).await.unwrap();

    assert_eq!(stats.total_fetched, 2);
    assert_eq!(stats.new, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.errors, 1);
    assert!(stats.is_consistent());
}

#[tokio::test]
async fn unknown_requested_profile_fails_the_run() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![Script::Page(vec![fresh("A", "Festival de música")])]));
    let store = Arc::new(MemoryStore::new());
    let request = CaptureRequest { profiles: vec!["test_plascp".into()], ..CaptureRequest::default() };

    let err = orchestrator(adapter.clone(), store.clone()).run(&request).await.unwrap_err();

    assert!(matches!(&err, GrantError::Validation(m) if m.contains("test_plascp")));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn recapture_of_unchanged_grant_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let page = || Script::Page(vec![fresh("A", "Suministro de papel")]);

    let first = orchestrator(Arc::new(ScriptedAdapter::new(vec![page()])), store.clone())
        .run(&CaptureRequest::default())
        .await
        .unwrap();
    let second = orchestrator(Arc::new(ScriptedAdapter::new(vec![page()])), store.clone())
        .run(&CaptureRequest::default())
        .await
        .unwrap();

    assert_eq!(first.new, 1);
    assert_eq!(second.new, 0);
    assert_eq!(second.skipped_unchanged, 1);
    assert!(second.new_grant_ids.is_empty());
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn result_and_page_limits() {
    let pages = || {
        vec![
            Script::Page(vec![fresh("A", "Servicio 1"), fresh("B", "Servicio 2")]),
            Script::Page(vec![fresh("C", "Servicio 3"), fresh("D", "Servicio 4")]),
            Script::Page(vec![fresh("E", "Servicio 5")]),
        ]
    };

    let capped = CaptureRequest { max_results: Some(3), ..CaptureRequest::default() };
    let stats = orchestrator(Arc::new(ScriptedAdapter::new(pages())), Arc::new(MemoryStore::new()))
        .run(&capped)
        .await
        .unwrap();
    assert_eq!(stats.total_fetched, 3);
    assert_eq!(stats.pages, 2);

    let one_page = CaptureRequest { max_pages: Some(1), ..CaptureRequest::default() };
    let adapter = Arc::new(ScriptedAdapter::new(pages()));
    let stats = orchestrator(adapter.clone(), Arc::new(MemoryStore::new())).run(&one_page).await.unwrap();
    assert_eq!(stats.total_fetched, 2);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_stops_between_records() {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut adapter = ScriptedAdapter::new(vec![
        Script::Page(vec![fresh("A", "Servicio 1")]),
        Script::Page(vec![fresh("B", "Servicio 2")]),
    ]);
    adapter.cancel_on_fetch = Some(cancel.clone());
    let store = Arc::new(MemoryStore::new());

    let stats = orchestrator(Arc::new(adapter), store.clone())
        .with_cancel(cancel)
        .run(&CaptureRequest::default())
        .await
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.pages, 1);
    assert_eq!(stats.total_fetched, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_profile_selection_accepts_everything() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![Script::Page(vec![fresh("A", "Festival de música")])]));
    let profiles = Arc::new(ProfileStore::new("unused-profiles.json"));
    let orchestrator = CaptureOrchestrator::new(
        adapter,
        Arc::new(ProcurementNormalizer::new()),
        Arc::new(MemoryStore::new()),
        profiles,
    );

    let stats = orchestrator.run(&CaptureRequest::default()).await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 0);
}

#[tokio::test]
async fn enrichment_runs_once_per_grant() {
    let with_document = || {
        let mut r = fresh("A", "Suministro de papel");
        r.insert("documents", json!(["https://example.invalid/pliego.pdf"]));
        Script::Page(vec![r])
    };
    let enricher = Arc::new(CountingEnricher { calls: AtomicUsize::new(0) });
    let store = Arc::new(MemoryStore::new());

    for _ in 0..2 {
        orchestrator(Arc::new(ScriptedAdapter::new(vec![with_document()])), store.clone())
            .with_enricher(enricher.clone())
            .run(&CaptureRequest::default())
            .await
            .unwrap();
    }

    assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    let grant = store.get("PLACSP-A").await.unwrap().unwrap();
    assert!(grant.data.content_text.unwrap().contains("12.000,00"));
}

#[test]
fn window_defaults_per_source() {
    let today = chrono::NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
    let request = CaptureRequest::default();

    let gazette = request.window(Source::Gazette, today);
    assert_eq!((gazette.from, gazette.to), (today, today));

    let subsidy = request.window(Source::SubsidyDb, today);
    assert_eq!(subsidy.from, chrono::NaiveDate::from_ymd_opt(2024, 3, 13).unwrap());

    let explicit = CaptureRequest {
        from: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
        lookback_days: Some(99),
        ..CaptureRequest::default()
    };
    assert_eq!(explicit.window(Source::Procurement, today).from, chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
}
