//! Canonical grant record shared by every source.
//!
//! A [`GrantDraft`] is what a normalizer produces from one raw record. The
//! store turns it into a [`Grant`] on first capture and merges later drafts of
//! the same natural code into it. Identity never changes after creation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Source ───────────────────────────────────────────────────────────

/// The three upstream sources. Serialized as their id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// National gazette daily summary.
    #[serde(rename = "BOE")]
    Gazette,
    /// National subsidy database.
    #[serde(rename = "BDNS")]
    SubsidyDb,
    /// Public procurement syndication feed.
    #[serde(rename = "PLACSP")]
    Procurement,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Gazette, Source::SubsidyDb, Source::Procurement];

    pub fn prefix(&self) -> &'static str {
        match self {
            Source::Gazette => "BOE",
            Source::SubsidyDb => "BDNS",
            Source::Procurement => "PLACSP",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boe" | "gazette" => Ok(Source::Gazette),
            "bdns" | "subsidy" | "subsidy-db" => Ok(Source::SubsidyDb),
            "placsp" | "procurement" => Ok(Source::Procurement),
            other => Err(format!("unknown source: '{other}'")),
        }
    }
}

// ── Attachments & links ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub xml_url: Option<String>,
    #[serde(default)]
    pub regulatory_base_url: Option<String>,
    #[serde(default)]
    pub electronic_office: Option<String>,
}

// ── Draft ────────────────────────────────────────────────────────────

/// Normalizer output: every capture-time field, no delivery or export markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantDraft {
    pub source: Source,
    pub natural_code: String,
    pub title: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub epigraph: Option<String>,
    #[serde(default)]
    pub publication_date: Option<NaiveDate>,
    #[serde(default)]
    pub application_start: Option<NaiveDate>,
    #[serde(default)]
    pub application_end: Option<NaiveDate>,
    #[serde(default)]
    pub budget_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub beneficiary_types: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub funds: Vec<String>,
    #[serde(default)]
    pub cpv_codes: Vec<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub is_nonprofit: bool,
    #[serde(default)]
    pub nonprofit_confidence: Option<f64>,
    /// Best profile score at capture time.
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub matched_profile: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Winner of the document URL priority chain.
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub links: Links,
    /// Enrichment text (e.g. extracted PDF body).
    #[serde(default)]
    pub content_text: Option<String>,
    /// Money mentions found by enrichment, as written.
    #[serde(default)]
    pub amounts: Vec<String>,
    /// Source timestamp used for cutoff checks.
    #[serde(default)]
    pub source_updated_at: Option<DateTime<Utc>>,
    /// Source-specific leftovers.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GrantDraft {
    /// Minimal draft; normalizers fill in the rest.
    pub fn new(source: Source, natural_code: impl Into<String>, title: impl Into<String>) -> Self {
        let natural_code: String = natural_code.into();
        Self {
            source,
            natural_code: natural_code.trim().to_string(),
            title: title.into(),
            department: None,
            section: None,
            epigraph: None,
            publication_date: None,
            application_start: None,
            application_end: None,
            budget_amount: None,
            currency: None,
            is_open: false,
            beneficiary_types: Vec::new(),
            sectors: Vec::new(),
            regions: Vec::new(),
            instruments: Vec::new(),
            funds: Vec::new(),
            cpv_codes: Vec::new(),
            contract_type: None,
            purpose: None,
            is_nonprofit: false,
            nonprofit_confidence: None,
            relevance_score: None,
            matched_profile: None,
            attachments: Vec::new(),
            document_url: None,
            links: Links::default(),
            content_text: None,
            amounts: Vec::new(),
            source_updated_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn id(&self) -> String {
        Grant::make_id(self.source, &self.natural_code)
    }
}

/// Open when the end of the application window is today or later.
/// A missing end date counts as open.
pub fn derive_open(explicit: Option<bool>, application_end: Option<NaiveDate>, today: NaiveDate) -> bool {
    match explicit {
        Some(flag) => flag,
        None => application_end.map_or(true, |end| end >= today),
    }
}

// ── Grant ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    #[default]
    None,
    Exported,
    ExportFailed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::None => "none",
            ExportStatus::Exported => "exported",
            ExportStatus::ExportFailed => "export_failed",
        }
    }
}

impl FromStr for ExportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ExportStatus::None),
            "exported" => Ok(ExportStatus::Exported),
            "export_failed" => Ok(ExportStatus::ExportFailed),
            other => Err(format!("unknown export status: '{other}'")),
        }
    }
}

/// Downstream export outcome reported through the delivery callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportMarkers {
    #[serde(default)]
    pub export_status: ExportStatus,
    #[serde(default)]
    pub external_row_id: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub export_error: Option<String>,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    /// `{source prefix}-{natural code}`.
    pub id: String,
    #[serde(flatten)]
    pub data: GrantDraft,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub forwarded_at: Option<DateTime<Utc>>,
    /// Delivery attempt that set `forwarded`.
    #[serde(default)]
    pub forwarded_attempt: Option<Uuid>,
    #[serde(flatten)]
    pub export: ExportMarkers,
    pub captured_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grant {
    /// Canonical id. A pure function of `(source, natural_code)`.
    pub fn make_id(source: Source, natural_code: &str) -> String {
        format!("{}-{}", source.prefix(), natural_code.trim())
    }

    pub fn from_draft(draft: GrantDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.id(),
            data: draft,
            forwarded: false,
            forwarded_at: None,
            forwarded_attempt: None,
            export: ExportMarkers::default(),
            captured_at: now,
            updated_at: now,
        }
    }

    pub fn source(&self) -> Source {
        self.data.source
    }

    /// Conservative merge predicate: only status, budget, application
    /// window or the attachment set justify a write.
    pub fn should_update(&self, draft: &GrantDraft) -> bool {
        let current = &self.data;
        if current.is_open != draft.is_open {
            return true;
        }
        if !same_amount(current.budget_amount, draft.budget_amount) {
            return true;
        }
        if current.application_start != draft.application_start
            || current.application_end != draft.application_end
        {
            return true;
        }
        attachment_urls(&current.attachments) != attachment_urls(&draft.attachments)
    }

    /// Merge a re-captured draft. Identity, delivery and export markers are
    /// kept; enrichment survives when the new draft carries none.
    pub fn apply_draft(&mut self, mut draft: GrantDraft, now: DateTime<Utc>) {
        debug_assert_eq!(draft.id(), self.id);
        if draft.content_text.is_none() {
            draft.content_text = self.data.content_text.take();
        }
        if draft.amounts.is_empty() {
            draft.amounts = std::mem::take(&mut self.data.amounts);
        }
        draft.source = self.data.source;
        draft.natural_code = std::mem::take(&mut self.data.natural_code);
        self.data = draft;
        self.updated_at = now;
    }
}

fn same_amount(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => (x - y).abs() < 0.005,
        (None, None) => true,
        _ => false,
    }
}

fn attachment_urls(attachments: &[Attachment]) -> BTreeSet<&str> {
    attachments.iter().map(|a| a.url.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> GrantDraft {
        let mut d = GrantDraft::new(Source::SubsidyDb, "812345", "Ayudas para fundaciones");
        d.is_open = true;
        d.budget_amount = Some(100_000.0);
        d
    }

    #[test]
    fn id_is_pure_function_of_source_and_code() {
        assert_eq!(Grant::make_id(Source::SubsidyDb, "812345"), "BDNS-812345");
        assert_eq!(Grant::make_id(Source::Gazette, " BOE-A-2024-1 "), "BOE-BOE-A-2024-1");
        assert_eq!(draft().id(), draft().id());
    }

    #[test]
    fn stored_code_matches_the_id() {
        let d = GrantDraft::new(Source::Procurement, "  15873245\n", "Suministro");
        assert_eq!(d.natural_code, "15873245");
        assert_eq!(d.id(), format!("PLACSP-{}", d.natural_code));
    }

    #[test]
    fn source_parses_prefix_and_alias() {
        assert_eq!("boe".parse::<Source>().unwrap(), Source::Gazette);
        assert_eq!("procurement".parse::<Source>().unwrap(), Source::Procurement);
        assert!("foo".parse::<Source>().is_err());
        assert_eq!(serde_json::to_string(&Source::SubsidyDb).unwrap(), "\"BDNS\"");
    }

    #[test]
    fn unchanged_recapture_does_not_update() {
        let grant = Grant::from_draft(draft(), Utc::now());
        let mut same = draft();
        same.title = "Retitled only".into();
        assert!(!grant.should_update(&same));
    }

    #[test]
    fn status_budget_window_and_attachments_trigger_update() {
        let grant = Grant::from_draft(draft(), Utc::now());

        let mut closed = draft();
        closed.is_open = false;
        assert!(grant.should_update(&closed));

        let mut budget = draft();
        budget.budget_amount = Some(120_000.0);
        assert!(grant.should_update(&budget));

        let mut window = draft();
        window.application_end = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert!(grant.should_update(&window));

        let mut docs = draft();
        docs.attachments.push(Attachment {
            id: "1".into(),
            name: "bases.pdf".into(),
            url: "https://example.org/1".into(),
            description: None,
        });
        assert!(grant.should_update(&docs));
    }

    #[test]
    fn merge_keeps_identity_and_markers() {
        let mut grant = Grant::from_draft(draft(), Utc::now());
        grant.forwarded = true;
        grant.data.content_text = Some("pdf body".into());

        let mut next = draft();
        next.is_open = false;
        grant.apply_draft(next, Utc::now());

        assert_eq!(grant.id, "BDNS-812345");
        assert!(grant.forwarded);
        assert!(!grant.data.is_open);
        assert_eq!(grant.data.content_text.as_deref(), Some("pdf body"));
    }

    #[test]
    fn open_flag_derivation() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(derive_open(None, None, today));
        assert!(derive_open(None, Some(today), today));
        assert!(!derive_open(None, NaiveDate::from_ymd_opt(2024, 5, 31), today));
        assert!(!derive_open(Some(false), None, today));
    }

    #[test]
    fn grant_serializes_flat() {
        let grant = Grant::from_draft(draft(), Utc::now());
        let v = serde_json::to_value(&grant).unwrap();
        assert_eq!(v["id"], "BDNS-812345");
        assert_eq!(v["title"], "Ayudas para fundaciones");
        assert_eq!(v["export_status"], "none");
        let back: Grant = serde_json::from_value(v).unwrap();
        assert_eq!(back, grant);
    }
}
