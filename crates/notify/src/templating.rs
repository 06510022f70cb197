//! Minijinja summaries used as payload `content_text`.
//!
//! One built-in template per source, registered once. Grants that carry
//! enrichment text longer than [`MIN_ENRICHMENT_CHARS`] send that text
//! instead of a rendered summary.

use minijinja::{context, Environment, Value};
use serde::Serialize;

use grantflow_core::{Grant, Source};

use crate::traits::NotifyError;

/// Enrichment text at or below this length is treated as absent.
pub const MIN_ENRICHMENT_CHARS: usize = 50;

const NOT_AVAILABLE: &str = "No disponible";

const SUBSIDY_TEMPLATE: &str = r#"CONVOCATORIA BDNS - {{ g.title }}
=====================================

INFORMACIÓN GENERAL
-------------------
Código BDNS: {{ g.natural_code }}
Organismo: {{ g.department | or("No especificado") }}
Tipo: {{ g.extra.convocatoria_type | or("No especificado") }}

PRESUPUESTO Y FINANCIACIÓN
--------------------------
Presupuesto Total: {{ g.budget_amount | eur }}
Instrumentos: {{ g.instruments | join(", ") | or("No especificado") }}
Fondos: {{ g.funds | join(", ") | or("No especificado") }}

PLAZOS Y ESTADO
---------------
Inicio Solicitudes: {{ g.application_start | or("No especificado") }}
Fin Solicitudes: {{ g.application_end | or("No especificado") }}
Estado: {{ "ABIERTA" if g.is_open else "CERRADA" }}

BENEFICIARIOS Y ALCANCE
-----------------------
Tipos de Beneficiarios: {{ g.beneficiary_types | join(", ") | or("No especificado") }}
Sectores: {{ g.sectors | join(", ") | or("No especificado") }}
Regiones: {{ g.regions | join(", ") | or("No especificado") }}

ORGANIZACIÓN SIN ÁNIMO DE LUCRO
-------------------------------
Dirigida a entidades sin ánimo de lucro: {{ "Sí" if g.is_nonprofit else "No" }}
Confianza del filtro: {{ g.nonprofit_confidence | pct }}

FINALIDAD
---------
{{ g.purpose | or("No especificada") }}

INFORMACIÓN NORMATIVA
--------------------
Bases Reguladoras: {{ g.links.regulatory_base_url | or }}
Sede Electrónica: {{ g.links.electronic_office | or }}
Ayuda de Estado: {{ g.extra.state_aid_number | or }}
URL Transparencia: {{ g.extra.state_aid_url | or }}

DATOS TÉCNICOS
--------------
Fecha de Publicación: {{ g.publication_date | or }}
Capturada: {{ captured_at }}
Relevancia: {{ g.relevance_score | round2 }}

Para más información:
https://www.infosubvenciones.es/bdnstrans/GE/es/convocatoria/{{ g.natural_code }}
"#;

const GAZETTE_TEMPLATE: &str = r#"INFORMACIÓN DE SUBVENCIÓN DEL BOE
=====================================

TÍTULO: {{ g.title }}

ORGANISMO CONVOCANTE: {{ g.department | or("No especificado") }}

SECCIÓN BOE: {{ g.section | or("") }}

FECHA DE PUBLICACIÓN: {{ g.publication_date | or("") }}

IDENTIFICADOR: {{ g.natural_code }}

ENLACES:
- PDF Original: {{ g.document_url | or }}
- HTML: {{ g.links.html_url | or }}
- XML: {{ g.links.xml_url | or }}

INFORMACIÓN ADICIONAL:
- Relevancia Estimada: {{ g.extra.estimated_relevance | round2 }}
- Sección: {{ g.section | or("No especificada") }}

NOTA IMPORTANTE:
El contenido completo del documento no pudo ser procesado automáticamente.
Consulte el documento oficial en el BOE mediante el enlace PDF proporcionado
para conocer requisitos, plazos, cuantías y procedimientos.
"#;

const PROCUREMENT_TEMPLATE: &str = r#"LICITACIÓN PLACSP - {{ g.title }}
=====================================

Expediente: {{ g.natural_code }}
Órgano de Contratación: {{ g.department | or("No especificado") }}
Tipo de Contrato: {{ g.contract_type | or("No especificado") }}
Códigos CPV: {{ g.cpv_codes | join(", ") | or("No especificado") }}
Lugar de Ejecución: {{ g.regions | join(", ") | or("No especificado") }}

Presupuesto Base: {{ g.budget_amount | eur }}
Fin de Presentación: {{ g.application_end | or("No especificado") }}
Estado: {{ "ABIERTA" if g.is_open else "CERRADA" }}

RESUMEN
-------
{{ g.purpose | or("Sin resumen") }}

Documentos:
{% for doc in g.attachments %}- {{ doc.name }}: {{ doc.url }}
{% else %}- Ninguno
{% endfor %}
Enlace: {{ g.links.html_url | or }}
"#;

/// How a payload's `content_text` was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    BdnsApi,
    PdfProcessed,
    MetadataOnly,
    AtomFeed,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::BdnsApi => "bdns_api",
            ExtractionMethod::PdfProcessed => "pdf_processed",
            ExtractionMethod::MetadataOnly => "metadata_only",
            ExtractionMethod::AtomFeed => "atom_feed",
        }
    }
}

/// Renders per-source grant summaries.
#[derive(Debug)]
pub struct SummaryRenderer {
    env: Environment<'static>,
}

impl SummaryRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("or", or_filter);
        env.add_filter("eur", eur_filter);
        env.add_filter("pct", pct_filter);
        env.add_filter("round2", round2_filter);

        // Built-in sources always parse; a failure here is a programming error.
        for (source, body) in [
            (Source::SubsidyDb, SUBSIDY_TEMPLATE),
            (Source::Gazette, GAZETTE_TEMPLATE),
            (Source::Procurement, PROCUREMENT_TEMPLATE),
        ] {
            env.add_template(source.prefix(), body)
                .expect("built-in summary template must parse");
        }
        Self { env }
    }

    /// Structured summary for `grant` from its source template.
    pub fn render(&self, grant: &Grant) -> Result<String, NotifyError> {
        let template = self
            .env
            .get_template(grant.source().prefix())
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        template
            .render(context! {
                g => &grant.data,
                id => &grant.id,
                captured_at => grant.captured_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Enrichment text when substantial, else the rendered summary.
    pub fn content_text(&self, grant: &Grant) -> Result<(String, ExtractionMethod), NotifyError> {
        if let Some(text) = enrichment_text(grant) {
            return Ok((text.to_string(), ExtractionMethod::PdfProcessed));
        }
        let method = match grant.source() {
            Source::SubsidyDb => ExtractionMethod::BdnsApi,
            Source::Gazette => ExtractionMethod::MetadataOnly,
            Source::Procurement => ExtractionMethod::AtomFeed,
        };
        Ok((self.render(grant)?, method))
    }
}

impl Default for SummaryRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn enrichment_text(grant: &Grant) -> Option<&str> {
    grant
        .data
        .content_text
        .as_deref()
        .map(str::trim)
        .filter(|t| t.chars().count() > MIN_ENRICHMENT_CHARS)
}

// ── Filters ─────────────────────────────────────────────────────────

/// Fallback for undefined, none and blank values.
fn or_filter(value: Value, fallback: Option<String>) -> Value {
    let missing = value.is_undefined() || value.is_none() || value.as_str().is_some_and(|s| s.trim().is_empty());
    if missing {
        Value::from(fallback.unwrap_or_else(|| NOT_AVAILABLE.to_string()))
    } else {
        value
    }
}

fn eur_filter(value: Value) -> String {
    match f64::try_from(value) {
        Ok(amount) => format!("{amount:.2} EUR"),
        Err(_) => "No especificado".to_string(),
    }
}

fn pct_filter(value: Value) -> String {
    match f64::try_from(value) {
        Ok(ratio) => format!("{:.0}%", ratio * 100.0),
        Err(_) => NOT_AVAILABLE.to_string(),
    }
}

fn round2_filter(value: Value) -> String {
    format!("{:.2}", f64::try_from(value).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use grantflow_core::{Attachment, GrantDraft};
    use serde_json::json;

    fn subsidy_grant() -> Grant {
        let mut d = GrantDraft::new(Source::SubsidyDb, "812345", "Ayudas a fundaciones culturales");
        d.department = Some("ESTADO - MINISTERIO DE CULTURA".into());
        d.budget_amount = Some(250_000.0);
        d.is_open = true;
        d.is_nonprofit = true;
        d.nonprofit_confidence = Some(0.8);
        d.application_end = NaiveDate::from_ymd_opt(2024, 4, 30);
        d.sectors = vec!["Cultura".into(), "Patrimonio".into()];
        d.extra.insert("convocatoria_type".into(), json!("Concurrencia competitiva"));
        Grant::from_draft(d, Utc::now())
    }

    #[test]
    fn subsidy_summary_is_structured() {
        let text = SummaryRenderer::new().render(&subsidy_grant()).unwrap();
        assert!(text.starts_with("CONVOCATORIA BDNS - Ayudas a fundaciones culturales"));
        assert!(text.contains("Presupuesto Total: 250000.00 EUR"));
        assert!(text.contains("Fin Solicitudes: 2024-04-30"));
        assert!(text.contains("Estado: ABIERTA"));
        assert!(text.contains("Sectores: Cultura, Patrimonio"));
        assert!(text.contains("Confianza del filtro: 80%"));
        assert!(text.contains("Tipo: Concurrencia competitiva"));
        assert!(text.contains("Fondos: No especificado"));
        assert!(text.contains("Ayuda de Estado: No disponible"));
    }

    #[test]
    fn gazette_fallback_lists_links() {
        let mut d = GrantDraft::new(Source::Gazette, "BOE-A-2024-5001", "Resolución de ayudas");
        d.document_url = Some("https://boe.es/x.pdf".into());
        d.extra.insert("estimated_relevance".into(), json!(0.4));
        let text = SummaryRenderer::new().render(&Grant::from_draft(d, Utc::now())).unwrap();
        assert!(text.contains("IDENTIFICADOR: BOE-A-2024-5001"));
        assert!(text.contains("- PDF Original: https://boe.es/x.pdf"));
        assert!(text.contains("- XML: No disponible"));
        assert!(text.contains("Relevancia Estimada: 0.40"));
    }

    #[test]
    fn procurement_summary_lists_documents() {
        let mut d = GrantDraft::new(Source::Procurement, "2024/EXP-77", "Servicio de limpieza");
        d.attachments = vec![Attachment {
            id: "1".into(),
            name: "pliego.pdf".into(),
            url: "https://example.invalid/pliego.pdf".into(),
            description: None,
        }];
        let text = SummaryRenderer::new().render(&Grant::from_draft(d, Utc::now())).unwrap();
        assert!(text.contains("Expediente: 2024/EXP-77"));
        assert!(text.contains("- pliego.pdf: https://example.invalid/pliego.pdf"));
    }

    #[test]
    fn long_enrichment_text_wins() {
        let mut grant = subsidy_grant();
        grant.data.content_text = Some("x".repeat(MIN_ENRICHMENT_CHARS + 1));
        let (text, method) = SummaryRenderer::new().content_text(&grant).unwrap();
        assert_eq!(method, ExtractionMethod::PdfProcessed);
        assert_eq!(text.len(), MIN_ENRICHMENT_CHARS + 1);
    }

    #[test]
    fn short_enrichment_text_is_ignored() {
        let mut grant = subsidy_grant();
        grant.data.content_text = Some("Ver documento adjunto.".into());
        let (text, method) = SummaryRenderer::new().content_text(&grant).unwrap();
        assert_eq!(method, ExtractionMethod::BdnsApi);
        assert!(text.starts_with("CONVOCATORIA BDNS"));
    }
}
