//! Source adapters.
//!
//! An adapter turns one cursor position into one page of [`RawRecord`]s plus
//! the cursor of the next page. It knows the wire format and nothing about
//! grants; normalizers interpret the records.

pub mod gazette;
pub mod procurement;
pub mod subsidy;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use grantflow_core::{GrantError, RawRecord, Result, Source};

pub use gazette::GazetteAdapter;
pub use procurement::ProcurementAdapter;
pub use subsidy::SubsidyAdapter;

// ── Cursor & window ─────────────────────────────────────────────────

/// Position inside a source. Each adapter understands exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// One gazette issue.
    Day(NaiveDate),
    /// Zero-based result page.
    Page(u32),
    /// Next feed document.
    Url(String),
}

/// Inclusive date range a capture run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl FetchWindow {
    /// Bounds are swapped when given in reverse.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// `days` back from `today`, inclusive of today.
    pub fn lookback(days: u32, today: NaiveDate) -> Self {
        let from = today.checked_sub_days(Days::new(days as u64)).unwrap_or(today);
        Self { from, to: today }
    }

    /// Records stamped before this instant are stale.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.from.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// One fetched page.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<RawRecord>,
    /// `None` when the source has nothing further in the window.
    pub next: Option<Cursor>,
}

// ── Adapter trait ───────────────────────────────────────────────────

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn first_cursor(&self, window: &FetchWindow) -> Cursor;

    /// Raw key holding the record timestamp used for stale checks.
    /// `None` disables stale detection for the source.
    fn timestamp_key(&self) -> Option<&'static str>;

    /// Fetch one page. Network failures and timeouts map to
    /// `GrantError::Transport`.
    async fn fetch(&self, window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage>;
}

// ── Shared HTTP plumbing ────────────────────────────────────────────

const USER_AGENT: &str = concat!("grantflow/", env!("CARGO_PKG_VERSION"));

pub(crate) fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub(crate) fn transport_error(source: Source, e: reqwest::Error) -> GrantError {
    GrantError::Transport {
        source_name: source.prefix().to_string(),
        message: e.to_string(),
        timeout: e.is_timeout(),
    }
}

pub(crate) fn unexpected_cursor(source: Source, cursor: &Cursor) -> GrantError {
    GrantError::Validation(format!("{source} adapter cannot follow cursor {cursor:?}"))
}

/// GET a JSON document. `404` yields `Ok(None)`; any other non-2xx status is
/// a transport error.
pub(crate) async fn get_json(
    client: &Client,
    source: Source,
    url: &str,
    query: &[(&str, String)],
) -> Result<Option<Value>> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .query(query)
        .send()
        .await
        .map_err(|e| transport_error(source, e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GrantError::transport(source.prefix(), format!("HTTP {status} from {url}: {body}")));
    }

    let value = response.json::<Value>().await.map_err(|e| transport_error(source, e))?;
    Ok(Some(value))
}

/// GET a text document. Non-2xx is a transport error.
pub(crate) async fn get_text(client: &Client, source: Source, url: &str) -> Result<String> {
    let response = client.get(url).send().await.map_err(|e| transport_error(source, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(GrantError::transport(source.prefix(), format!("HTTP {status} from {url}")));
    }
    response.text().await.map_err(|e| transport_error(source, e))
}

/// Treat a JSON node that may be an object or an array of objects as a list.
pub(crate) fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}
