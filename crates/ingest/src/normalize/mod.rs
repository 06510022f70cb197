//! Raw record → [`GrantDraft`], one normalizer per source.
//!
//! Normalizers are pure: no I/O, no clock except the day used to derive the
//! open flag. A record without a usable natural code is a
//! `GrantError::MalformedRecord`.

mod gazette;
mod procurement;
mod subsidy;

use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;

use grantflow_core::{Attachment, GrantDraft, GrantError, RawRecord, Result, Source};

pub use gazette::{estimated_relevance, GazetteNormalizer};
pub use procurement::ProcurementNormalizer;
pub use subsidy::SubsidyNormalizer;

pub trait Normalizer: Send + Sync {
    fn source(&self) -> Source;

    fn normalize(&self, raw: &RawRecord) -> Result<GrantDraft>;
}

/// The normalizer matching a source.
pub fn normalizer_for(source: Source) -> Box<dyn Normalizer> {
    match source {
        Source::Gazette => Box::new(GazetteNormalizer::new()),
        Source::SubsidyDb => Box::new(SubsidyNormalizer::new()),
        Source::Procurement => Box::new(ProcurementNormalizer::new()),
    }
}

/// Reference day for open-flag derivation. Fixed in tests.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Today(Option<NaiveDate>);

impl Today {
    pub(crate) fn fixed(day: NaiveDate) -> Self {
        Self(Some(day))
    }

    pub(crate) fn get(&self) -> NaiveDate {
        self.0.unwrap_or_else(|| Utc::now().date_naive())
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// First non-blank document URL in priority order: enumerated attachments,
/// then the secondary announcement link, then the regulatory-basis URL.
pub fn resolve_document_url(
    attachments: &[Attachment],
    secondary: Option<&str>,
    regulatory_base: Option<&str>,
) -> Option<String> {
    attachments
        .iter()
        .map(|a| a.url.as_str())
        .chain(secondary)
        .chain(regulatory_base)
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}

pub(crate) fn require(raw: &RawRecord, source: Source, keys: &[&str]) -> Result<String> {
    keys.iter()
        .find_map(|k| raw.str(k))
        .ok_or_else(|| GrantError::malformed(source.prefix(), format!("missing {}", keys.join(" / "))))
}

/// Number of keywords present in already-lowercased text.
pub(crate) fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

const NONPROFIT_SPECIFIC: &[&str] = &[
    "sin ánimo de lucro", "sin animo de lucro",
    "ong", "ongs", "organizaciones no gubernamentales",
    "asociación", "asociaciones",
    "fundación", "fundaciones",
    "entidades sociales", "tercer sector",
    "voluntariado", "acción social",
];
const NONPROFIT_RELATED: &[&str] = &["social", "cooperación", "solidaridad"];

/// Terms matched as whole words, so `ong` never hits `congreso`.
pub(crate) struct WholeWords(Vec<Regex>);

impl WholeWords {
    pub(crate) fn new(terms: &[&str]) -> Self {
        Self(
            terms
                .iter()
                .map(|t| Regex::new(&format!(r"\b{}\b", regex::escape(t))).expect("escaped term is a valid pattern"))
                .collect(),
        )
    }

    /// Number of terms present in already-lowercased text.
    pub(crate) fn hits(&self, text: &str) -> usize {
        self.0.iter().filter(|re| re.is_match(text)).count()
    }
}

static SPECIFIC_TERMS: LazyLock<WholeWords> = LazyLock::new(|| WholeWords::new(NONPROFIT_SPECIFIC));
static RELATED_TERMS: LazyLock<WholeWords> = LazyLock::new(|| WholeWords::new(NONPROFIT_RELATED));

/// Specific nonprofit terms count 0.3 each, loosely related ones 0.1.
/// Terms match whole words only. Nonprofit when the total reaches 0.3;
/// confidence capped at 1.
pub(crate) fn weighted_nonprofit(text: &str) -> (bool, f64) {
    let text = text.to_lowercase();
    let confidence = 0.3 * SPECIFIC_TERMS.hits(&text) as f64 + 0.1 * RELATED_TERMS.hits(&text) as f64;
    (confidence >= 0.3 - 1e-9, confidence.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(url: &str) -> Attachment {
        Attachment { id: "1".into(), name: "doc.pdf".into(), url: url.into(), description: None }
    }

    #[test]
    fn attachments_win_over_announcements_and_bases() {
        let url = resolve_document_url(&[attachment("https://a/1")], Some("https://boe/x.pdf"), Some("https://bases"));
        assert_eq!(url.as_deref(), Some("https://a/1"));
    }

    #[test]
    fn chain_skips_blank_entries() {
        assert_eq!(
            resolve_document_url(&[attachment("  ")], Some(""), Some("https://bases")).as_deref(),
            Some("https://bases")
        );
        assert_eq!(resolve_document_url(&[], Some("https://boe/x.pdf"), None).as_deref(), Some("https://boe/x.pdf"));
        assert_eq!(resolve_document_url(&[], None, None), None);
    }

    #[test]
    fn weighted_nonprofit_thresholds() {
        assert_eq!(weighted_nonprofit("Ayudas a fundaciones"), (true, 0.3));
        let (np, conf) = weighted_nonprofit("Cooperación y solidaridad");
        assert!(!np);
        assert!((conf - 0.2).abs() < 1e-9);
        let (np, conf) = weighted_nonprofit("ONG, asociaciones y fundaciones del tercer sector, voluntariado");
        assert!(np);
        assert_eq!(conf, 1.0);
    }

    #[test]
    fn nonprofit_terms_match_whole_words() {
        assert_eq!(weighted_nonprofit("Congreso internacional sobre longitud de onda"), (false, 0.0));
        let (np, conf) = weighted_nonprofit("Subvenciones a ONGs de desarrollo");
        assert!(np);
        assert!((conf - 0.3).abs() < 1e-9);
    }

    #[test]
    fn normalizer_for_each_source() {
        for source in Source::ALL {
            assert_eq!(normalizer_for(source).source(), source);
        }
    }
}
