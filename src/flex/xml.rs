//! Flex XML parsing.
//!
//! Two shapes are handled differently, per `spec.md` §9 "Polymorphism over
//! XML payload types": the small, fully-typed request/poll envelope uses
//! `quick_xml`'s serde integration (grounded in `Czichy-ibkr-rust`'s
//! `flex_statement` module, which deserializes `FlexStatementResponse` the
//! same way); the statement body itself is walked generically with
//! `quick_xml::Reader` events, since raw persistence and preflight must
//! handle sections this crate does not know about ahead of time — the spec
//! explicitly says not to model an exhaustive type hierarchy for every
//! IBKR section.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The request-phase and in-progress/error poll-phase envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlexStatementResponse {
    pub status: String,
    #[serde(rename = "ReferenceCode")]
    pub reference_code: Option<String>,
    #[serde(rename = "Url")]
    pub url: Option<String>,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<u32>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: Option<String>,
}

pub fn parse_envelope(xml: &str) -> Result<FlexStatementResponse, quick_xml::de::DeError> {
    quick_xml::de::from_str(xml)
}

/// Peek the document's root element name without fully parsing it, so the
/// transport adapter can dispatch between the status envelope and the
/// successful `FlexQueryResponse` statement body.
pub fn root_tag_name(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// One row under a section container: its element attributes as a
/// string->string mapping (`spec.md` §3 "Raw record", §4.4).
pub type RowAttrs = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct SectionRaw {
    pub name: String,
    pub rows: Vec<RowAttrs>,
}

#[derive(Debug, Clone, Default)]
pub struct FlexStatementRaw {
    pub attributes: RowAttrs,
    pub sections: Vec<SectionRaw>,
}

#[derive(Debug, Clone, Default)]
pub struct FlexDocument {
    pub statements: Vec<FlexStatementRaw>,
}

/// Walk `FlexQueryResponse/FlexStatements/FlexStatement/*/*`, collecting
/// every section container's rows as attribute maps. Permissive: any
/// section name is recorded, known or not (`spec.md` §4.4).
pub fn parse_statement_body(xml: &str) -> Result<FlexDocument, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    // depth: 0 before FlexQueryResponse, 1 inside it, 2 inside FlexStatements,
    // 3 inside a FlexStatement, 4 inside a section container.
    let mut depth: u32 = 0;
    let mut document = FlexDocument::default();
    let mut current_statement: Option<FlexStatementRaw> = None;
    let mut current_section: Option<SectionRaw> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if depth == 2 && name == "FlexStatement" {
                    let mut stmt = FlexStatementRaw::default();
                    stmt.attributes = attrs_of(&e);
                    current_statement = Some(stmt);
                } else if depth == 3 {
                    current_section = Some(SectionRaw {
                        name,
                        rows: Vec::new(),
                    });
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if depth == 3 {
                    // A section container with no rows at all, e.g. <Trades/>.
                    if let Some(stmt) = current_statement.as_mut() {
                        stmt.sections.push(SectionRaw { name, rows: Vec::new() });
                    }
                } else if depth == 4 {
                    if let Some(section) = current_section.as_mut() {
                        section.rows.push(attrs_of(&e));
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                depth = depth.saturating_sub(1);
                if depth == 2 && name == "FlexStatement" {
                    if let Some(stmt) = current_statement.take() {
                        document.statements.push(stmt);
                    }
                } else if depth == 3 {
                    if let (Some(section), Some(stmt)) =
                        (current_section.take(), current_statement.as_mut())
                    {
                        stmt.sections.push(section);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(document)
}

fn attrs_of(e: &quick_xml::events::BytesStart<'_>) -> RowAttrs {
    let mut map = BTreeMap::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_default();
        map.insert(key, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<FlexQueryResponse queryName="q" type="AF">
  <FlexStatements count="1">
    <FlexStatement accountId="U123" fromDate="2026-02-01" toDate="2026-02-28" whenGenerated="2026-03-01;00:00">
      <Trades>
        <Trade transactionID="1" symbol="AAPL" quantity="100"/>
        <Trade transactionID="2" symbol="AAPL" quantity="-40"/>
      </Trades>
      <CashTransactions>
        <CashTransaction transactionID="T7" amount="10.00"/>
      </CashTransactions>
      <OpenPositions/>
    </FlexStatement>
  </FlexStatements>
</FlexQueryResponse>"#;

    #[test]
    fn root_tag_detects_success_envelope() {
        assert_eq!(root_tag_name(SAMPLE).as_deref(), Some("FlexQueryResponse"));
    }

    #[test]
    fn parses_sections_and_rows_including_empty_section() {
        let doc = parse_statement_body(SAMPLE).unwrap();
        assert_eq!(doc.statements.len(), 1);
        let stmt = &doc.statements[0];
        assert_eq!(stmt.attributes.get("accountId").unwrap(), "U123");
        assert_eq!(stmt.sections.len(), 3);

        let trades = stmt.sections.iter().find(|s| s.name == "Trades").unwrap();
        assert_eq!(trades.rows.len(), 2);
        assert_eq!(trades.rows[0].get("transactionID").unwrap(), "1");

        let open_positions = stmt
            .sections
            .iter()
            .find(|s| s.name == "OpenPositions")
            .unwrap();
        assert!(open_positions.rows.is_empty());
    }
}
