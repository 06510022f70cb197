//! Subsidy database adapter.
//!
//! Searches newest-first within the window, one results page per cursor, and
//! fetches the full detail of each call. A detail that cannot be fetched
//! degrades to the search summary instead of failing the page.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use grantflow_core::config::SourcesConfig;
use grantflow_core::{GrantError, RawRecord, Result, Source};

use super::{get_json, http_client, unexpected_cursor, Cursor, FetchWindow, SourceAdapter, SourcePage};

/// Portal id for the general state-wide catalogue.
const PORTAL: &str = "GE";

/// Upstream cap on results per page.
const MAX_PAGE_SIZE: u32 = 100;

pub struct SubsidyAdapter {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl SubsidyAdapter {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, page_size: u32) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(&config.bdns_api_url, config.timeout_secs, config.page_size)
    }

    fn search_query(&self, window: &FetchWindow, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("page", page.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("order", "fechaRecepcion".to_string()),
            ("direccion", "desc".to_string()),
            ("vpd", PORTAL.to_string()),
            ("fechaDesde", spanish_date(window.from)),
            ("fechaHasta", spanish_date(window.to)),
        ]
    }

    /// Full call detail, or `None` when the upstream has no detail for it.
    async fn detail(&self, number: &str) -> Result<Option<Value>> {
        let url = format!("{}/convocatorias", self.base_url);
        let query = [("numConv", number.to_string()), ("vpd", PORTAL.to_string())];
        let detail = get_json(&self.client, Source::SubsidyDb, &url, &query).await?;
        Ok(detail.filter(|d| d.get("codigoBDNS").is_some()))
    }

    async fn record_for(&self, summary: &Value) -> Option<RawRecord> {
        let summary = RawRecord::from_value(summary.clone())?;
        let Some(number) = summary.str("numeroConvocatoria") else {
            return Some(summary);
        };

        match self.detail(&number).await {
            Ok(Some(detail)) => {
                let mut record = RawRecord::from_value(detail)?;
                merge_summary(&mut record, &summary);
                Some(record)
            }
            Ok(None) => {
                debug!(number = %number, "no detail published, using search summary");
                Some(summary)
            }
            Err(e) => {
                warn!(number = %number, error = %e, "detail fetch failed, using search summary");
                Some(summary)
            }
        }
    }
}

/// Keep summary-only keys the detail document does not repeat.
fn merge_summary(detail: &mut RawRecord, summary: &RawRecord) {
    for (key, value) in summary.as_map() {
        if detail.get(key).is_none() {
            detail.insert(key.clone(), value.clone());
        }
    }
}

fn spanish_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[async_trait]
impl SourceAdapter for SubsidyAdapter {
    fn source(&self) -> Source {
        Source::SubsidyDb
    }

    fn first_cursor(&self, _window: &FetchWindow) -> Cursor {
        Cursor::Page(0)
    }

    fn timestamp_key(&self) -> Option<&'static str> {
        Some("fechaRecepcion")
    }

    async fn fetch(&self, window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage> {
        let Cursor::Page(page) = cursor else {
            return Err(unexpected_cursor(Source::SubsidyDb, cursor));
        };
        let page = *page;

        let url = format!("{}/convocatorias/busqueda", self.base_url);
        let body = get_json(&self.client, Source::SubsidyDb, &url, &self.search_query(window, page))
            .await?
            .ok_or_else(|| GrantError::transport(Source::SubsidyDb.prefix(), format!("search endpoint not found: {url}")))?;

        let summaries = body.get("content").and_then(Value::as_array).cloned().unwrap_or_default();
        let last = body.get("last").and_then(Value::as_bool).unwrap_or(true);

        let mut records = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            match self.record_for(summary).await {
                Some(record) => records.push(record),
                None => warn!(page, "search result is not an object, skipped"),
            }
        }

        let next = (!last && !summaries.is_empty()).then(|| Cursor::Page(page + 1));
        Ok(SourcePage { records, next })
    }
}
