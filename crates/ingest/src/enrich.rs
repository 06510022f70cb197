//! Optional enrichment of accepted drafts from their document.
//!
//! The built-in [`PdfEnricher`] downloads `document_url`, extracts its text
//! and collects the money mentions in it. Enrichment is best effort: callers
//! log failures and keep the draft as it was.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use grantflow_core::amounts::{extract_amount_mentions, extract_amounts};
use grantflow_core::GrantDraft;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document returned HTTP {0}")]
    Status(u16),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("draft has no document URL")]
    NoDocument,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fill `content_text` and `amounts`. Returns whether anything was added.
    async fn enrich(&self, draft: &mut GrantDraft) -> Result<bool, EnrichError>;
}

/// Longest enrichment text kept on a grant.
pub const DEFAULT_MAX_CHARS: usize = 50_000;

pub struct PdfEnricher {
    client: Client,
    max_chars: usize,
}

impl PdfEnricher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl Enricher for PdfEnricher {
    async fn enrich(&self, draft: &mut GrantDraft) -> Result<bool, EnrichError> {
        let url = draft.document_url.clone().ok_or(EnrichError::NoDocument)?;

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EnrichError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;

        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| EnrichError::Pdf(e.to_string()))??;

        debug!(grant = %draft.id(), url = %url, chars = text.len(), "document text extracted");
        Ok(apply_text(draft, &text, self.max_chars))
    }
}

/// Extract text from PDF bytes, pages joined by blank lines.
///
/// pdf-extract returns one string with form feeds between pages; blank pages
/// are dropped.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, EnrichError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| EnrichError::Pdf(e.to_string()))?;
    let pages: Vec<&str> = text
        .split('\x0C')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect();
    Ok(pages.join("\n\n"))
}

/// Store extracted text on the draft. A missing budget is taken from the
/// first amount mentioned.
pub fn apply_text(draft: &mut GrantDraft, text: &str, max_chars: usize) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    let kept: String = text.chars().take(max_chars).collect();
    draft.amounts = extract_amount_mentions(&kept);
    if draft.budget_amount.is_none() {
        draft.budget_amount = draft.amounts.iter().flat_map(|m| extract_amounts(m)).next();
    }
    draft.content_text = Some(kept);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::Source;

    fn draft() -> GrantDraft {
        GrantDraft::new(Source::Gazette, "BOE-A-2024-1", "Ayudas")
    }

    #[test]
    fn text_fills_amounts_and_missing_budget() {
        let mut d = draft();
        let changed = apply_text(
            &mut d,
            "La cuantía total máxima es de 1.250.000,00 euros. Cada proyecto recibirá 30.000 €.",
            DEFAULT_MAX_CHARS,
        );
        assert!(changed);
        assert_eq!(d.amounts.len(), 2);
        assert_eq!(d.budget_amount, Some(1_250_000.0));
        assert!(d.content_text.unwrap().starts_with("La cuantía"));
    }

    #[test]
    fn existing_budget_is_kept() {
        let mut d = draft();
        d.budget_amount = Some(10.0);
        apply_text(&mut d, "Dotación de 500 euros", DEFAULT_MAX_CHARS);
        assert_eq!(d.budget_amount, Some(10.0));
    }

    #[test]
    fn blank_text_changes_nothing() {
        let mut d = draft();
        assert!(!apply_text(&mut d, "  \n ", DEFAULT_MAX_CHARS));
        assert!(d.content_text.is_none());
    }

    #[test]
    fn text_is_cut_on_char_boundary() {
        let mut d = draft();
        apply_text(&mut d, &"ñ".repeat(20), 5);
        assert_eq!(d.content_text.as_deref(), Some("ñññññ"));
    }

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        assert!(matches!(extract_pdf_text(b"not a pdf"), Err(EnrichError::Pdf(_))));
    }

    #[tokio::test]
    async fn draft_without_document_is_rejected() {
        let enricher = PdfEnricher::new(1);
        let mut d = draft();
        assert!(matches!(enricher.enrich(&mut d).await, Err(EnrichError::NoDocument)));
    }
}
