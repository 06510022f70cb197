use std::sync::LazyLock;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::debug;

use grantflow_core::dates::{parse_flexible_date, parse_timestamp};
use grantflow_core::{derive_open, Attachment, GrantDraft, Links, RawRecord, Result, Source};

use super::{require, resolve_document_url, Normalizer, Today, WholeWords};

const DOCUMENT_URL_BASE: &str = "https://www.infosubvenciones.es/bdnstrans/api/documento";

const NONPROFIT_KEYWORDS: &[&str] = &[
    "sin ánimo de lucro",
    "sin fines de lucro",
    "entidades no lucrativas",
    "fundación",
    "fundaciones",
    "asociación",
    "asociaciones",
    "ong",
    "ongs",
    "tercer sector",
    "economía social",
    "entidades sociales",
    "acción social",
    "voluntariado",
    "personas jurídicas que no desarrollan actividad económica",
    "personas físicas que no desarrollan actividad económica",
];

static NONPROFIT_TERMS: LazyLock<WholeWords> = LazyLock::new(|| WholeWords::new(NONPROFIT_KEYWORDS));

/// `min(0.5 + 0.15 · matches, 1)` when any keyword matches.
fn nonprofit_confidence(text: &str) -> Option<f64> {
    match NONPROFIT_TERMS.hits(&text.to_lowercase()) {
        0 => None,
        n => Some((0.5 + 0.15 * n as f64).min(1.0)),
    }
}

/// `nivel1 - nivel2` from the `organo` object, or from the flat keys of a
/// search summary.
fn department(raw: &RawRecord) -> Option<String> {
    let levels: Vec<String> = match raw.object("organo") {
        Some(organ) => ["nivel1", "nivel2"]
            .iter()
            .filter_map(|k| organ.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => ["nivel1", "nivel2"].iter().filter_map(|k| raw.str(k)).collect(),
    };
    (!levels.is_empty()).then(|| levels.join(" - "))
}

fn attachments(raw: &RawRecord) -> Vec<Attachment> {
    raw.array("documentos")
        .iter()
        .filter_map(|doc| {
            let id = match doc.get("id")? {
                Value::Number(n) => n.to_string(),
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => return None,
            };
            let name = doc
                .get("nombreFic")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{id}.pdf"));
            let description = doc
                .get("descripcion")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            Some(Attachment { url: format!("{DOCUMENT_URL_BASE}/{id}"), id, name, description })
        })
        .collect()
}

/// First announcement link, plus a text rendition when it points at a
/// gazette PDF with a known CVE.
fn announcement_links(raw: &RawRecord) -> (Option<String>, Option<String>) {
    let Some(first) = raw.array("anuncios").first() else {
        return (None, None);
    };
    let url = first
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let html = match (&url, first.get("cve").and_then(Value::as_str)) {
        (Some(u), Some(cve)) if u.contains("boe.es") && u.to_lowercase().contains("pdf") => {
            Some(format!("https://boe.es/diario_boe/txt.php?id={}", cve.trim()))
        }
        _ => None,
    };
    (url, html)
}

#[derive(Debug, Default)]
pub struct SubsidyNormalizer {
    today: Today,
}

impl SubsidyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(day: NaiveDate) -> Self {
        Self { today: Today::fixed(day) }
    }
}

impl Normalizer for SubsidyNormalizer {
    fn source(&self) -> Source {
        Source::SubsidyDb
    }

    fn normalize(&self, raw: &RawRecord) -> Result<GrantDraft> {
        let code = require(raw, Source::SubsidyDb, &["codigoBDNS", "numeroConvocatoria"])?;
        let title = require(raw, Source::SubsidyDb, &["descripcion"])?;

        let application_start = parse_flexible_date(raw.str("fechaInicioSolicitud").as_deref(), "fechaInicioSolicitud");
        let application_end = parse_flexible_date(raw.str("fechaFinSolicitud").as_deref(), "fechaFinSolicitud");
        let beneficiary_types = raw.labels("tiposBeneficiarios", "descripcion");
        let purpose = raw.str("descripcionFinalidad");

        let screened = format!("{title} {} {}", purpose.as_deref().unwrap_or(""), beneficiary_types.join(" "));
        let confidence = nonprofit_confidence(&screened);

        let attachments = attachments(raw);
        let (announcement, html_url) = announcement_links(raw);
        let regulatory_base_url = raw.str("urlBasesReguladoras");

        let mut draft = GrantDraft::new(Source::SubsidyDb, &code, &title);
        draft.department = department(raw);
        draft.publication_date = parse_flexible_date(raw.str("fechaRecepcion").as_deref(), "fechaRecepcion");
        draft.application_start = application_start;
        draft.application_end = application_end;
        draft.budget_amount = raw.f64("presupuestoTotal");
        draft.currency = draft.budget_amount.map(|_| "EUR".to_string());
        draft.is_open = derive_open(raw.bool("abierto"), application_end, self.today.get());
        draft.beneficiary_types = beneficiary_types;
        draft.sectors = raw.labels("sectores", "descripcion");
        draft.regions = raw.labels("regiones", "descripcion");
        draft.instruments = raw.labels("instrumentos", "descripcion");
        draft.funds = raw.labels("fondos", "descripcion");
        draft.purpose = purpose;
        draft.is_nonprofit = confidence.is_some();
        draft.nonprofit_confidence = confidence;
        draft.document_url = resolve_document_url(&attachments, announcement.as_deref(), regulatory_base_url.as_deref());
        draft.attachments = attachments;
        draft.links = Links {
            html_url,
            xml_url: None,
            regulatory_base_url,
            electronic_office: raw.str("sedeElectronica"),
        };
        draft.source_updated_at = parse_timestamp(raw.str("fechaRecepcion").as_deref(), "fechaRecepcion");

        for (raw_key, extra_key) in [
            ("id", "bdns_id"),
            ("numeroConvocatoria", "convocatoria_number"),
            ("tipoConvocatoria", "convocatoria_type"),
            ("ayudaEstado", "state_aid_number"),
            ("urlAyudaEstado", "state_aid_url"),
        ] {
            if let Some(v) = raw.str(raw_key) {
                draft.extra.insert(extra_key.into(), json!(v));
            }
        }
        if let Some(mrr) = raw.bool("mrr") {
            draft.extra.insert("mrr".into(), json!(mrr));
        }

        debug!(code = %code, documents = draft.attachments.len(), "subsidy record normalized");
        Ok(draft)
    }
}
