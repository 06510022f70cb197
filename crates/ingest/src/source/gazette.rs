//! Gazette daily summary adapter.
//!
//! One page per issue day. The summary nests
//! `diario → seccion → departamento → epigrafe → item`, where every level may
//! be a single object or an array. Only items in grant-bearing sections that
//! pass the keyword pre-screen are yielded.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use grantflow_core::config::SourcesConfig;
use grantflow_core::{RawRecord, Result, Source};

use super::{as_list, get_json, http_client, unexpected_cursor, Cursor, FetchWindow, SourceAdapter, SourcePage};

/// Sections that publish calls for grants.
pub const RELEVANT_SECTIONS: &[&str] = &[
    "I. Disposiciones generales",
    "III. Otras disposiciones",
    "V.A. Anuncios - Contratación del Sector Público",
    "V.B. Anuncios - Otros anuncios oficiales",
];

const GRANT_KEYWORDS: &[&str] = &[
    "subvención", "subvenciones", "subvencion",
    "ayuda", "ayudas", "ayuda económica", "ayuda financiera",
    "beca", "becas",
    "premio", "premios",
    "convocatoria", "convocatorias", "convoca",
    "bases reguladoras", "bases de la convocatoria",
    "fondos next generation", "next generation eu", "ngeu",
    "plan de recuperación", "prtr",
    "línea de ayuda", "líneas de ayuda",
    "programa de apoyo", "programa de ayuda",
    "incentivo", "incentivos",
    "financiación", "financiacion", "cofinanciación",
    "startup", "pyme", "pymes", "microempresa",
    "emprendedor", "emprendedores", "emprendimiento",
    "innovación", "i+d+i", "investigación", "desarrollo",
    "transformación digital", "digitalización",
    "sostenibilidad", "medioambiente", "economía circular",
    "transición energética", "energías renovables",
];

static GRANT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"orden\s+\w+/\d+.*convocatoria",
        r"resolución.*ayuda",
        r"real decreto.*subvención",
        r"programa.*\d+.*millones",
        r"línea.*\d+.*euros",
        r"fondo.*dotado",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("grant pattern is valid"))
    .collect()
});

/// Keyword and title-pattern pre-screen for grant announcements.
pub fn is_grant_related(title: &str, department: &str) -> bool {
    let text = format!("{} {}", title.to_lowercase(), department.to_lowercase());
    GRANT_KEYWORDS.iter().any(|k| text.contains(k)) || GRANT_PATTERNS.iter().any(|re| re.is_match(&text))
}

fn is_relevant_section(name: &str) -> bool {
    RELEVANT_SECTIONS.iter().any(|s| name.contains(s))
}

pub struct GazetteAdapter {
    client: Client,
    base_url: String,
}

impl GazetteAdapter {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(&config.boe_api_url, config.timeout_secs)
    }

    fn summary_url(&self, day: NaiveDate) -> String {
        format!("{}/boe/sumario/{}", self.base_url, day.format("%Y%m%d"))
    }
}

#[async_trait]
impl SourceAdapter for GazetteAdapter {
    fn source(&self) -> Source {
        Source::Gazette
    }

    fn first_cursor(&self, window: &FetchWindow) -> Cursor {
        Cursor::Day(window.from)
    }

    fn timestamp_key(&self) -> Option<&'static str> {
        None
    }

    async fn fetch(&self, window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage> {
        let Cursor::Day(day) = cursor else {
            return Err(unexpected_cursor(Source::Gazette, cursor));
        };
        let day = *day;

        let records = match get_json(&self.client, Source::Gazette, &self.summary_url(day), &[]).await? {
            Some(body) => parse_summary(&body, day),
            None => {
                info!(%day, "no gazette issue published");
                Vec::new()
            }
        };

        let next = (day < window.to).then(|| day.succ_opt()).flatten().map(Cursor::Day);
        Ok(SourcePage { records, next })
    }
}

/// Flatten one daily summary into raw item records.
pub fn parse_summary(body: &Value, day: NaiveDate) -> Vec<RawRecord> {
    let Some(summary) = body.get("data").and_then(|d| d.get("sumario")) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    let mut scanned = 0usize;

    for diary in as_list(summary.get("diario")) {
        for section in as_list(diary.get("seccion")) {
            let section_name = name_of(section);
            if !is_relevant_section(section_name) {
                continue;
            }
            for dept in as_list(section.get("departamento")) {
                let dept_name = name_of(dept);

                let mut items: Vec<(&str, &Value)> =
                    as_list(dept.get("item")).into_iter().map(|i| ("", i)).collect();
                for epigraph in as_list(dept.get("epigrafe")) {
                    let epigraph_name = name_of(epigraph);
                    items.extend(as_list(epigraph.get("item")).into_iter().map(|i| (epigraph_name, i)));
                }

                for (epigraph_name, item) in items {
                    scanned += 1;
                    let title = text_of(item.get("titulo"));
                    let id = text_of(item.get("identificador"));
                    if title.is_empty() || !is_grant_related(title, dept_name) {
                        continue;
                    }
                    // Kept without an identifier so the normalizer counts it as malformed.
                    records.push(
                        RawRecord::new()
                            .with("identificador", non_empty(id))
                            .with("titulo", Some(title))
                            .with("department", non_empty(dept_name))
                            .with("section", non_empty(section_name))
                            .with("epigraph", non_empty(epigraph_name))
                            .with("publication_date", Some(day.format("%Y-%m-%d").to_string()))
                            .with("url_pdf", non_empty(text_of(item.get("url_pdf")))),
                    );
                }
            }
        }
    }

    debug!(%day, scanned, kept = records.len(), "gazette summary parsed");
    records
}

fn name_of(node: &Value) -> &str {
    node.get("nombre").and_then(Value::as_str).unwrap_or("").trim()
}

/// Plain string, or the `texto` member of a link object.
fn text_of(node: Option<&Value>) -> &str {
    match node {
        Some(Value::String(s)) => s.trim(),
        Some(Value::Object(o)) => o.get("texto").and_then(Value::as_str).unwrap_or("").trim(),
        _ => "",
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn summary() -> Value {
        json!({
            "data": {"sumario": {"diario": [{
                "seccion": [
                    {
                        "nombre": "III. Otras disposiciones",
                        "departamento": [{
                            "nombre": "MINISTERIO DE CULTURA",
                            "epigrafe": [{
                                "nombre": "Subvenciones",
                                "item": {
                                    "identificador": "BOE-A-2024-5001",
                                    "titulo": "Resolución por la que se convocan ayudas a fundaciones",
                                    "url_pdf": {"texto": "https://www.boe.es/boe/dias/2024/03/15/pdfs/BOE-A-2024-5001.pdf"}
                                }
                            }, {
                                "nombre": "Nombramientos",
                                "item": [{
                                    "identificador": "BOE-A-2024-5002",
                                    "titulo": "Nombramiento de director general"
                                }]
                            }]
                        }]
                    },
                    {
                        "nombre": "II. Autoridades y personal",
                        "departamento": {"nombre": "X", "item": {"identificador": "BOE-A-2024-5003", "titulo": "Convocatoria de oposiciones"}}
                    }
                ]
            }]}}
        })
    }

    #[test]
    fn walks_nested_summary_and_prescreens() {
        let records = parse_summary(&summary(), day());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.str("identificador").as_deref(), Some("BOE-A-2024-5001"));
        assert_eq!(r.str("department").as_deref(), Some("MINISTERIO DE CULTURA"));
        assert_eq!(r.str("section").as_deref(), Some("III. Otras disposiciones"));
        assert_eq!(r.str("epigraph").as_deref(), Some("Subvenciones"));
        assert_eq!(r.str("publication_date").as_deref(), Some("2024-03-15"));
        assert!(r.str("url_pdf").unwrap().ends_with("BOE-A-2024-5001.pdf"));
    }

    #[test]
    fn grant_item_without_identifier_is_kept() {
        let body = json!({"data": {"sumario": {"diario": {"seccion": {
            "nombre": "III. Otras disposiciones",
            "departamento": {"nombre": "MINISTERIO DE CULTURA", "item": {
                "titulo": "Extracto de la convocatoria de subvenciones para festivales"
            }}
        }}}}});
        let records = parse_summary(&body, day());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].str("identificador"), None);
        assert!(records[0].str("titulo").is_some());
    }

    #[test]
    fn missing_summary_yields_nothing() {
        assert!(parse_summary(&json!({"status": {"code": "404"}}), day()).is_empty());
    }

    #[test]
    fn prescreen_uses_keywords_and_patterns() {
        assert!(is_grant_related("Bases reguladoras de becas", ""));
        assert!(is_grant_related("Fondo especial dotado con cargo al presupuesto", ""));
        assert!(is_grant_related("Anuncio", "Agencia de Innovación"));
        assert!(!is_grant_related("Nombramiento de vocal", "Consejo de Estado"));
    }

    #[test]
    fn first_cursor_and_summary_url() {
        let adapter = GazetteAdapter::new("https://example.invalid/api/", 5);
        let window = FetchWindow::new(day(), day());
        assert_eq!(adapter.first_cursor(&window), Cursor::Day(day()));
        assert_eq!(adapter.summary_url(day()), "https://example.invalid/api/boe/sumario/20240315");
    }
}
