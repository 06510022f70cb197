use chrono::NaiveDate;
use serde_json::json;

use grantflow_core::dates::{parse_flexible_date, parse_timestamp};
use grantflow_core::{derive_open, Attachment, GrantDraft, GrantError, Links, RawRecord, Result, Source};

use super::{resolve_document_url, weighted_nonprofit, Normalizer, Today};

const UNTITLED: &str = "Sin título";

/// Contract folder id, else the last path segment of the entry id.
fn natural_code(raw: &RawRecord) -> Result<String> {
    if let Some(folder) = raw.str("folder_id") {
        return Ok(folder);
    }
    raw.str("id")
        .and_then(|id| {
            id.trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| GrantError::malformed(Source::Procurement.prefix(), "missing folder_id / id"))
}

/// `Órgano de Contratación: …` from the `;`-separated entry summary.
fn department_from_summary(summary: &str) -> Option<String> {
    summary
        .split(';')
        .find_map(|part| part.split_once("Órgano de Contratación:").map(|(_, v)| v.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn attachments(raw: &RawRecord) -> Vec<Attachment> {
    raw.labels("documents", "url")
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let name = url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("document")
                .to_string();
            Attachment { id: (i + 1).to_string(), name, url, description: None }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ProcurementNormalizer {
    today: Today,
}

impl ProcurementNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(day: NaiveDate) -> Self {
        Self { today: Today::fixed(day) }
    }
}

impl Normalizer for ProcurementNormalizer {
    fn source(&self) -> Source {
        Source::Procurement
    }

    fn normalize(&self, raw: &RawRecord) -> Result<GrantDraft> {
        let code = natural_code(raw)?;
        let title = raw
            .str("project_name")
            .or_else(|| raw.str("title"))
            .unwrap_or_else(|| UNTITLED.to_string());
        let summary = raw.str("summary");
        let department = raw
            .str("department")
            .or_else(|| summary.as_deref().and_then(department_from_summary));

        let updated = parse_timestamp(raw.str("updated").as_deref(), "updated");
        let application_end = parse_flexible_date(raw.str("application_end_date").as_deref(), "application_end_date");
        let attachments = attachments(raw);

        let screened = format!(
            "{title} {} {}",
            department.as_deref().unwrap_or(""),
            summary.as_deref().unwrap_or("")
        );
        let (is_nonprofit, confidence) = weighted_nonprofit(&screened);

        let mut draft = GrantDraft::new(Source::Procurement, &code, title);
        draft.department = department;
        draft.publication_date = updated.map(|ts| ts.date_naive());
        draft.application_end = application_end;
        draft.budget_amount = raw.f64("budget_amount");
        draft.currency = raw.str("currency");
        draft.is_open = derive_open(None, application_end, self.today.get());
        draft.cpv_codes = raw.labels("cpv_codes", "code");
        draft.regions = raw.labels("regions", "name");
        draft.contract_type = raw.str("contract_type");
        draft.purpose = summary;
        draft.is_nonprofit = is_nonprofit;
        draft.nonprofit_confidence = Some(confidence);
        draft.document_url = resolve_document_url(&attachments, None, None);
        draft.attachments = attachments;
        draft.links = Links { html_url: raw.str("link"), ..Links::default() };
        draft.source_updated_at = updated;
        if let Some(entry_id) = raw.str("id") {
            draft.extra.insert("entry_id".into(), json!(entry_id));
        }
        Ok(draft)
    }
}
