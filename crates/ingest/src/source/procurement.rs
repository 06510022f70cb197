//! Procurement syndication feed adapter.
//!
//! Each Atom document is one page; `link[rel=next]` gives the next cursor.
//! Entries embed a CODICE `ContractFolderStatus`. Namespace prefixes vary
//! between feed generations, so elements are matched by local name only.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use grantflow_core::config::SourcesConfig;
use grantflow_core::{GrantError, RawRecord, Result, Source};

use super::{get_text, http_client, unexpected_cursor, Cursor, FetchWindow, SourceAdapter, SourcePage};

pub struct ProcurementAdapter {
    client: Client,
    feed_url: String,
}

impl ProcurementAdapter {
    pub fn new(feed_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            feed_url: feed_url.into(),
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(&config.placsp_feed_url, config.timeout_secs)
    }
}

#[async_trait]
impl SourceAdapter for ProcurementAdapter {
    fn source(&self) -> Source {
        Source::Procurement
    }

    fn first_cursor(&self, _window: &FetchWindow) -> Cursor {
        Cursor::Url(self.feed_url.clone())
    }

    fn timestamp_key(&self) -> Option<&'static str> {
        Some("updated")
    }

    async fn fetch(&self, _window: &FetchWindow, cursor: &Cursor) -> Result<SourcePage> {
        let Cursor::Url(url) = cursor else {
            return Err(unexpected_cursor(Source::Procurement, cursor));
        };
        let body = get_text(&self.client, Source::Procurement, url).await?;
        let feed = parse_feed(&body)?;
        debug!(url = %url, entries = feed.entries.len(), "feed page parsed");
        Ok(SourcePage {
            records: feed.entries,
            next: feed.next.filter(|next| next != url).map(Cursor::Url),
        })
    }
}

// ── Feed parsing ────────────────────────────────────────────────────

/// One parsed Atom document.
#[derive(Debug, Default)]
pub struct Feed {
    pub entries: Vec<RawRecord>,
    pub next: Option<String>,
}

/// Fields collected for one `<entry>`.
#[derive(Debug, Default)]
struct EntryFields {
    id: Option<String>,
    title: Option<String>,
    updated: Option<String>,
    link: Option<String>,
    summary: Option<String>,
    folder_id: Option<String>,
    department: Option<String>,
    project_name: Option<String>,
    budget_amount: Option<f64>,
    currency: Option<String>,
    contract_type: Option<String>,
    cpv_codes: Vec<String>,
    regions: Vec<String>,
    deadline_date: Option<String>,
    deadline_time: Option<String>,
    documents: Vec<String>,
}

impl EntryFields {
    fn into_record(self) -> RawRecord {
        let deadline = self.deadline_date.map(|date| match self.deadline_time {
            Some(time) => format!("{date}T{time}"),
            None => date,
        });
        RawRecord::new()
            .with("id", self.id)
            .with("title", self.title)
            .with("updated", self.updated)
            .with("link", self.link)
            .with("summary", self.summary)
            .with("folder_id", self.folder_id)
            .with("department", self.department)
            .with("project_name", self.project_name)
            .with("budget_amount", self.budget_amount)
            .with("currency", self.currency)
            .with("contract_type", self.contract_type)
            .with("cpv_codes", Some(strings(self.cpv_codes)))
            .with("regions", Some(strings(self.regions)))
            .with("application_end_date", deadline)
            .with("documents", Some(strings(self.documents)))
    }

    /// Route the text of a closed element by its ancestry.
    fn assign(&mut self, path: &[String], text: String) {
        let Some(leaf) = path.last().map(String::as_str) else { return };
        let parent = path.len().checked_sub(2).map(|i| path[i].as_str()).unwrap_or("");
        let within = |name: &str| path.iter().any(|p| p == name);

        match leaf {
            "id" if parent == "entry" => set_once(&mut self.id, text),
            "title" if parent == "entry" => set_once(&mut self.title, text),
            "updated" if parent == "entry" => set_once(&mut self.updated, text),
            "summary" if parent == "entry" => set_once(&mut self.summary, text),
            "ContractFolderID" => set_once(&mut self.folder_id, text),
            "Name" if parent == "PartyName" && within("LocatedContractingParty") => {
                set_once(&mut self.department, text)
            }
            "Name" if parent == "ProcurementProject" => set_once(&mut self.project_name, text),
            "TotalAmount" if parent == "BudgetAmount" && within("ProcurementProject") => {
                if self.budget_amount.is_none() {
                    self.budget_amount = text.parse().ok();
                }
            }
            "TypeCode" if parent == "ProcurementProject" => set_once(&mut self.contract_type, text),
            "ItemClassificationCode" if within("RequiredCommodityClassification") => push_unique(&mut self.cpv_codes, text),
            "CountrySubentity" if within("RealizedLocation") => push_unique(&mut self.regions, text),
            "EndDate" if parent == "TenderSubmissionDeadlinePeriod" => set_once(&mut self.deadline_date, text),
            "EndTime" if parent == "TenderSubmissionDeadlinePeriod" => set_once(&mut self.deadline_time, text),
            "URI" if within("Attachment") => push_unique(&mut self.documents, text),
            _ => {}
        }
    }
}

fn set_once(slot: &mut Option<String>, text: String) {
    if slot.is_none() && !text.is_empty() {
        *slot = Some(text);
    }
}

fn push_unique(list: &mut Vec<String>, text: String) {
    if !text.is_empty() && !list.contains(&text) {
        list.push(text);
    }
}

fn strings(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn xml_error(e: impl std::fmt::Display) -> GrantError {
    GrantError::transport(Source::Procurement.prefix(), format!("unparseable feed: {e}"))
}

/// Parse one Atom document into raw entry records and the next-page link.
pub fn parse_feed(xml: &str) -> Result<Feed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut entry: Option<EntryFields> = None;
    let mut root: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = local_name(&e);
                root.get_or_insert_with(|| name.clone());
                on_open(&e, &name, &path, &mut feed, entry.as_mut());
                if name == "entry" && path.len() == 1 {
                    entry = Some(EntryFields::default());
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                root.get_or_insert_with(|| name.clone());
                on_open(&e, &name, &path, &mut feed, entry.as_mut());
            }
            Event::Text(e) => text.push_str(&e.unescape().map_err(xml_error)?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                if let Some(fields) = entry.as_mut() {
                    fields.assign(&path, std::mem::take(&mut text).trim().to_string());
                }
                if path.len() == 2 && path.last().is_some_and(|n| n == "entry") {
                    if let Some(fields) = entry.take() {
                        feed.entries.push(fields.into_record());
                    }
                }
                path.pop();
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if root.as_deref() != Some("feed") {
        return Err(xml_error("document root is not an Atom feed"));
    }
    Ok(feed)
}

/// Attribute-carrying elements: feed/entry links and budget currency.
fn on_open(e: &BytesStart<'_>, name: &str, path: &[String], feed: &mut Feed, entry: Option<&mut EntryFields>) {
    let parent = path.last().map(String::as_str).unwrap_or("");
    match (name, parent) {
        ("link", "feed") => {
            if attr(e, b"rel").as_deref() == Some("next") {
                feed.next = attr(e, b"href");
            }
        }
        ("link", "entry") => {
            if let Some(fields) = entry {
                if fields.link.is_none() {
                    fields.link = attr(e, b"href");
                }
            }
        }
        ("TotalAmount", "BudgetAmount") => {
            if let Some(fields) = entry {
                if fields.currency.is_none() && path.iter().any(|p| p == "ProcurementProject") {
                    fields.currency = attr(e, b"currencyID");
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:cbc="urn:dgpe:names:draft:codice:schema:xsd:CommonBasicComponents-2"
      xmlns:cac="urn:dgpe:names:draft:codice:schema:xsd:CommonAggregateComponents-2"
      xmlns:cac-place-ext="urn:dgpe:names:draft:codice-place-ext:schema:xsd:CommonAggregateComponents-2">
  <title>Licitaciones</title>
  <link href="https://example.invalid/feed.atom" rel="self"/>
  <link href="https://example.invalid/feed_2.atom" rel="next"/>
  <entry>
    <id>https://contrataciondelestado.es/sindicacion/licitacionesPerfilContratante/15873245</id>
    <link href="https://contrataciondelestado.es/wps/poc?uri=deeplink:detalle_licitacion&amp;idEvl=abc"/>
    <summary type="text">Id licitación: 2024/EXP-77; Órgano de Contratación: Ayuntamiento de Soria; Importe: 120000 EUR</summary>
    <title>Servicio de limpieza de dependencias municipales</title>
    <updated>2024-03-15T10:20:30.512+01:00</updated>
    <cac-place-ext:ContractFolderStatus>
      <cbc:ContractFolderID>2024/EXP-77</cbc:ContractFolderID>
      <cac-place-ext:LocatedContractingParty>
        <cac:Party>
          <cac:PartyName><cbc:Name>Junta de Gobierno Local del Ayuntamiento de Soria</cbc:Name></cac:PartyName>
        </cac:Party>
      </cac-place-ext:LocatedContractingParty>
      <cac:ProcurementProject>
        <cbc:Name>Servicio de limpieza de edificios</cbc:Name>
        <cbc:TypeCode>2</cbc:TypeCode>
        <cac:BudgetAmount>
          <cbc:TotalAmount currencyID="EUR">145200.5</cbc:TotalAmount>
        </cac:BudgetAmount>
        <cac:RequiredCommodityClassification><cbc:ItemClassificationCode>90910000</cbc:ItemClassificationCode></cac:RequiredCommodityClassification>
        <cac:RequiredCommodityClassification><cbc:ItemClassificationCode>90911200</cbc:ItemClassificationCode></cac:RequiredCommodityClassification>
        <cac:RealizedLocation><cbc:CountrySubentity>Soria</cbc:CountrySubentity></cac:RealizedLocation>
      </cac:ProcurementProject>
      <cac:TenderingProcess>
        <cac:TenderSubmissionDeadlinePeriod>
          <cbc:EndDate>2024-04-02</cbc:EndDate>
          <cbc:EndTime>14:00:00</cbc:EndTime>
        </cac:TenderSubmissionDeadlinePeriod>
      </cac:TenderingProcess>
      <cac-place-ext:LegalDocumentReference>
        <cac:Attachment><cac:ExternalReference><cbc:URI>https://example.invalid/pliego.pdf</cbc:URI></cac:ExternalReference></cac:Attachment>
      </cac-place-ext:LegalDocumentReference>
    </cac-place-ext:ContractFolderStatus>
  </entry>
  <entry>
    <id>https://contrataciondelestado.es/sindicacion/licitacionesPerfilContratante/15873246</id>
    <title><![CDATA[Suministro de mobiliario & equipamiento]]></title>
    <updated>2024-03-14T08:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_and_next_link() {
        let feed = parse_feed(FEED).unwrap();
        assert_eq!(feed.next.as_deref(), Some("https://example.invalid/feed_2.atom"));
        assert_eq!(feed.entries.len(), 2);

        let e = &feed.entries[0];
        assert_eq!(e.str("folder_id").as_deref(), Some("2024/EXP-77"));
        assert_eq!(e.str("title").as_deref(), Some("Servicio de limpieza de dependencias municipales"));
        assert_eq!(e.str("project_name").as_deref(), Some("Servicio de limpieza de edificios"));
        assert_eq!(e.str("department").as_deref(), Some("Junta de Gobierno Local del Ayuntamiento de Soria"));
        assert_eq!(e.f64("budget_amount"), Some(145200.5));
        assert_eq!(e.str("currency").as_deref(), Some("EUR"));
        assert_eq!(e.str("contract_type").as_deref(), Some("2"));
        assert_eq!(e.labels("cpv_codes", ""), vec!["90910000", "90911200"]);
        assert_eq!(e.labels("regions", ""), vec!["Soria"]);
        assert_eq!(e.str("application_end_date").as_deref(), Some("2024-04-02T14:00:00"));
        assert_eq!(e.labels("documents", ""), vec!["https://example.invalid/pliego.pdf"]);
        assert!(e.str("link").unwrap().contains("idEvl=abc"));
        assert!(e.str("summary").unwrap().contains("Órgano de Contratación"));
    }

    #[test]
    fn minimal_entry_keeps_cdata_title() {
        let feed = parse_feed(FEED).unwrap();
        let e = &feed.entries[1];
        assert_eq!(e.str("title").as_deref(), Some("Suministro de mobiliario & equipamiento"));
        assert_eq!(e.str("folder_id"), None);
        assert!(e.labels("documents", "").is_empty());
    }

    #[test]
    fn feed_without_next_link_ends_pagination() {
        let feed = parse_feed(r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>x</title></feed>"#).unwrap();
        assert!(feed.entries.is_empty());
        assert!(feed.next.is_none());
    }

    #[test]
    fn non_feed_document_is_rejected() {
        assert!(parse_feed("<html><body>maintenance</body></html>").is_err());
        assert!(parse_feed("<feed><entry></feed>").is_err());
    }
}
