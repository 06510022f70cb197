use chrono::NaiveDate;
use serde_json::json;

use grantflow_core::dates::parse_flexible_date;
use grantflow_core::{derive_open, GrantDraft, Links, RawRecord, Result, Source};

use super::{keyword_hits, require, resolve_document_url, weighted_nonprofit, Normalizer, Today};

const HIGH_RELEVANCE: &[&str] = &["next generation", "pyme", "startup", "emprendedor", "innovación", "i+d+i"];
const MEDIUM_RELEVANCE: &[&str] = &["subvención", "ayuda", "convocatoria", "financiación"];
const LOW_RELEVANCE: &[&str] = &["beca", "premio", "apoyo"];

/// Informational keyword score in `[0, 1]`. Never used to reject.
pub fn estimated_relevance(title: &str, department: &str) -> f64 {
    let text = format!("{} {}", title.to_lowercase(), department.to_lowercase());
    let score = 0.3 * keyword_hits(&text, HIGH_RELEVANCE) as f64
        + 0.2 * keyword_hits(&text, MEDIUM_RELEVANCE) as f64
        + 0.1 * keyword_hits(&text, LOW_RELEVANCE) as f64;
    score.min(1.0)
}

fn pdf_url(day: NaiveDate, id: &str) -> String {
    format!("https://boe.es/boe/days/{}/pdfs/{id}.pdf", day.format("%Y/%m/%d"))
}

#[derive(Debug, Default)]
pub struct GazetteNormalizer {
    today: Today,
}

impl GazetteNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(day: NaiveDate) -> Self {
        Self { today: Today::fixed(day) }
    }
}

impl Normalizer for GazetteNormalizer {
    fn source(&self) -> Source {
        Source::Gazette
    }

    fn normalize(&self, raw: &RawRecord) -> Result<GrantDraft> {
        let id = require(raw, Source::Gazette, &["identificador"])?;
        let title = require(raw, Source::Gazette, &["titulo"])?;
        let department = raw.str("department");
        let publication_date = parse_flexible_date(raw.str("publication_date").as_deref(), "publication_date");

        let pdf = raw
            .str("url_pdf")
            .or_else(|| publication_date.map(|day| pdf_url(day, &id)));

        let mut draft = GrantDraft::new(Source::Gazette, &id, &title);
        let (is_nonprofit, confidence) =
            weighted_nonprofit(&format!("{title} {}", department.as_deref().unwrap_or("")));
        let relevance = estimated_relevance(&title, department.as_deref().unwrap_or(""));

        draft.section = raw.str("section");
        draft.epigraph = raw.str("epigraph");
        draft.department = department;
        draft.publication_date = publication_date;
        draft.is_open = derive_open(None, None, self.today.get());
        draft.is_nonprofit = is_nonprofit;
        draft.nonprofit_confidence = Some(confidence);
        draft.relevance_score = Some(relevance);
        draft.document_url = resolve_document_url(&[], pdf.as_deref(), None);
        draft.links = Links {
            html_url: Some(format!("https://boe.es/diario_boe/txt.php?id={id}")),
            xml_url: Some(format!("https://boe.es/diario_boe/xml.php?id={id}")),
            regulatory_base_url: pdf,
            electronic_office: None,
        };
        draft.source_updated_at = publication_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc());
        draft.extra.insert("boe_id".into(), json!(id));
        draft.extra.insert("estimated_relevance".into(), json!(relevance));
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::GrantError;
    use serde_json::json;

    fn raw() -> RawRecord {
        RawRecord::from_value(json!({
            "identificador": "BOE-A-2024-5001",
            "titulo": "Resolución por la que se convocan ayudas a fundaciones y asociaciones",
            "department": "MINISTERIO DE CULTURA",
            "section": "III. Otras disposiciones",
            "epigraph": "Subvenciones",
            "publication_date": "2024-03-15"
        }))
        .unwrap()
    }

    #[test]
    fn builds_urls_from_id_and_date() {
        let draft = GazetteNormalizer::new().normalize(&raw()).unwrap();
        assert_eq!(draft.id(), "BOE-BOE-A-2024-5001");
        let pdf = "https://boe.es/boe/days/2024/03/15/pdfs/BOE-A-2024-5001.pdf";
        assert_eq!(draft.document_url.as_deref(), Some(pdf));
        assert_eq!(draft.links.regulatory_base_url.as_deref(), Some(pdf));
        assert_eq!(draft.links.html_url.as_deref(), Some("https://boe.es/diario_boe/txt.php?id=BOE-A-2024-5001"));
        assert_eq!(draft.links.xml_url.as_deref(), Some("https://boe.es/diario_boe/xml.php?id=BOE-A-2024-5001"));
        assert_eq!(draft.publication_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert!(draft.is_open);
    }

    #[test]
    fn published_pdf_link_wins_over_derived_one() {
        let mut r = raw();
        r.insert("url_pdf", "https://www.boe.es/boe/dias/2024/03/15/pdfs/BOE-A-2024-5001.pdf");
        let draft = GazetteNormalizer::new().normalize(&r).unwrap();
        assert!(draft.document_url.unwrap().contains("/dias/"));
    }

    #[test]
    fn classifies_nonprofit_and_relevance() {
        let draft = GazetteNormalizer::new().normalize(&raw()).unwrap();
        assert!(draft.is_nonprofit);
        assert!((draft.nonprofit_confidence.unwrap() - 0.6).abs() < 1e-9);
        assert!((draft.relevance_score.unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(draft.extra["estimated_relevance"], json!(draft.relevance_score.unwrap()));
    }

    #[test]
    fn relevance_is_capped() {
        let score = estimated_relevance("Ayuda y subvención next generation para pyme startup emprendedor", "");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn missing_identifier_is_malformed() {
        let r = RawRecord::from_value(json!({"titulo": "Ayudas"})).unwrap();
        let err = GazetteNormalizer::new().normalize(&r).unwrap_err();
        assert!(matches!(err, GrantError::MalformedRecord { .. }));
    }
}
