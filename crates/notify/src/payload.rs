//! Downstream JSON payload.
//!
//! Nested `metadata` and `processing_info` objects plus the flat field set
//! older workflow nodes still read.

use chrono::Utc;
use serde_json::{json, Map, Value};

use grantflow_core::{Grant, Source};

use crate::templating::{ExtractionMethod, SummaryRenderer};
use crate::traits::NotifyError;

pub fn build_payload(grant: &Grant, renderer: &SummaryRenderer) -> Result<Value, NotifyError> {
    let d = &grant.data;
    let (content_text, method) = renderer.content_text(grant)?;

    let data_type = match (grant.source(), method) {
        (_, ExtractionMethod::PdfProcessed) | (Source::Gazette, _) => "pdf",
        _ => "structured",
    };
    let estimated_relevance = d.extra.get("estimated_relevance").cloned().unwrap_or(json!(d.relevance_score));

    Ok(json!({
        "id": grant.id,
        "source": grant.source().prefix(),
        "type": "grant",
        "timestamp": Utc::now().to_rfc3339(),
        "title": d.title,
        "description": description(grant),
        "metadata": metadata(grant),
        "content_text": content_text,
        "processing_info": {
            "captured_at": grant.captured_at.to_rfc3339(),
            "extraction_method": method.as_str(),
            "data_type": data_type,
            "estimated_relevance": estimated_relevance,
            "matched_profile": d.matched_profile,
        },

        "department": d.department,
        "section": d.section,
        "publication_date": d.publication_date,
        "application_start_date": d.application_start,
        "application_end_date": d.application_end,
        "budget_amount": d.budget_amount,
        "is_open": d.is_open,
        "is_nonprofit": d.is_nonprofit,
        "nonprofit_confidence": d.nonprofit_confidence,
        "beneficiary_types": d.beneficiary_types,
        "sectors": d.sectors,
        "regions": d.regions,
        "pdf_url": d.document_url,
        "html_url": d.links.html_url,
        "xml_url": d.links.xml_url,
        "purpose": d.purpose,
        "relevance_score": d.relevance_score,
        "pdf_content_text": content_text,
    }))
}

fn description(grant: &Grant) -> String {
    let d = &grant.data;
    let mut text = format!("Convocatoria publicada por {}", d.department.as_deref().unwrap_or("organismo no especificado"));
    if let Some(section) = &d.section {
        text.push_str(&format!(" en {section}"));
    }
    if d.relevance_score.is_some_and(|s| s > 0.5) {
        text.push_str(" [Alta Relevancia]");
    }
    text
}

/// Source-specific structured fields.
fn metadata(grant: &Grant) -> Value {
    let d = &grant.data;
    let mut meta = Map::new();
    meta.insert("attachments".into(), json!(d.attachments));
    meta.insert("amounts".into(), json!(d.amounts));

    let specific = match grant.source() {
        Source::SubsidyDb => json!({
            "bdns_code": d.natural_code,
            "bdns_id": d.extra.get("bdns_id"),
            "budget_amount": d.budget_amount,
            "application_start_date": d.application_start,
            "application_end_date": d.application_end,
            "is_open": d.is_open,
            "is_nonprofit": d.is_nonprofit,
            "nonprofit_confidence": d.nonprofit_confidence,
            "beneficiary_types": d.beneficiary_types,
            "sectors": d.sectors,
            "regions": d.regions,
            "instruments": d.instruments,
            "funds": d.funds,
            "convocatoria_type": d.extra.get("convocatoria_type"),
            "purpose": d.purpose,
            "regulatory_base_url": d.links.regulatory_base_url,
            "electronic_office": d.links.electronic_office,
            "state_aid_number": d.extra.get("state_aid_number"),
            "state_aid_url": d.extra.get("state_aid_url"),
        }),
        Source::Gazette => json!({
            "boe_id": d.natural_code,
            "section": d.section,
            "epigraph": d.epigraph,
            "estimated_relevance": d.extra.get("estimated_relevance"),
        }),
        Source::Procurement => json!({
            "folder_id": d.natural_code,
            "entry_id": d.extra.get("entry_id"),
            "contract_type": d.contract_type,
            "cpv_codes": d.cpv_codes,
            "budget_amount": d.budget_amount,
            "currency": d.currency,
            "application_end_date": d.application_end,
            "regions": d.regions,
        }),
    };
    if let Value::Object(fields) = specific {
        meta.extend(fields);
    }
    Value::Object(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use grantflow_core::GrantDraft;

    fn grant(source: Source, code: &str) -> Grant {
        let mut d = GrantDraft::new(source, code, "Ayudas para asociaciones");
        d.department = Some("MINISTERIO DE DERECHOS SOCIALES".into());
        d.budget_amount = Some(50_000.0);
        d.application_end = NaiveDate::from_ymd_opt(2024, 5, 31);
        d.relevance_score = Some(0.75);
        d.matched_profile = Some("nonprofit".into());
        d.extra.insert("bdns_id".into(), json!(998877));
        Grant::from_draft(d, Utc::now())
    }

    #[test]
    fn envelope_and_legacy_fields() {
        let p = build_payload(&grant(Source::SubsidyDb, "812345"), &SummaryRenderer::new()).unwrap();
        assert_eq!(p["id"], "BDNS-812345");
        assert_eq!(p["source"], "BDNS");
        assert_eq!(p["type"], "grant");
        assert_eq!(p["budget_amount"], 50_000.0);
        assert_eq!(p["application_end_date"], "2024-05-31");
        assert_eq!(p["pdf_content_text"], p["content_text"]);
        assert!(p["description"].as_str().unwrap().ends_with("[Alta Relevancia]"));
    }

    #[test]
    fn processing_info_reflects_source() {
        let p = build_payload(&grant(Source::SubsidyDb, "812345"), &SummaryRenderer::new()).unwrap();
        assert_eq!(p["processing_info"]["extraction_method"], "bdns_api");
        assert_eq!(p["processing_info"]["data_type"], "structured");
        assert_eq!(p["processing_info"]["matched_profile"], "nonprofit");
        assert_eq!(p["metadata"]["bdns_code"], "812345");
        assert_eq!(p["metadata"]["bdns_id"], 998877);

        let p = build_payload(&grant(Source::Procurement, "EXP-1"), &SummaryRenderer::new()).unwrap();
        assert_eq!(p["processing_info"]["extraction_method"], "atom_feed");
        assert_eq!(p["metadata"]["folder_id"], "EXP-1");
    }

    #[test]
    fn enriched_gazette_grant_is_pdf_processed() {
        let mut g = grant(Source::Gazette, "BOE-A-2024-1");
        g.data.content_text = Some("Artículo 1. Objeto. ".repeat(10));
        g.data.extra.insert("estimated_relevance".into(), json!(0.3));
        let p = build_payload(&g, &SummaryRenderer::new()).unwrap();
        assert_eq!(p["processing_info"]["extraction_method"], "pdf_processed");
        assert_eq!(p["processing_info"]["data_type"], "pdf");
        assert_eq!(p["processing_info"]["estimated_relevance"], 0.3);
        assert!(p["content_text"].as_str().unwrap().starts_with("Artículo 1."));
    }
}
