//! XML encoding of metadata documents.
//!
//! The alternate wire encoding of the metadata API.  This module renders
//! response payloads and faults with `quick-xml`, and decodes request bodies
//! into the same structural form the JSON decoder produces, so the
//! controller never sees which encoding a client used.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::errors::MetadataError;
use crate::metadata::store::MetadataSet;

/// XML namespace of the compute API documents.
pub const XMLNS: &str = "http://docs.openstack.org/compute/api/v1.1";

// ── Rendering ───────────────────────────────────────────────────────

/// Render a `<metadata>` document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <metadata xmlns="http://docs.openstack.org/compute/api/v1.1">
///   <meta key="key1">value1</meta>
/// </metadata>
/// ```
///
/// Entries are written in key order.
pub fn render_metadata(metadata: &MetadataSet) -> String {
    let mut writer = new_writer();

    let root = BytesStart::new("metadata").with_attributes([("xmlns", XMLNS)]);
    writer.write_event(Event::Start(root)).expect("start root");

    let sorted: BTreeMap<_, _> = metadata.iter().collect();
    for (key, value) in sorted {
        write_meta_element(&mut writer, key, value, false);
    }

    writer
        .write_event(Event::End(BytesEnd::new("metadata")))
        .expect("end root");

    finish(writer)
}

/// Render a single `<meta key="...">value</meta>` document.
pub fn render_meta(key: &str, value: &str) -> String {
    let mut writer = new_writer();
    write_meta_element(&mut writer, key, value, true);
    finish(writer)
}

/// Render a fault document, e.g. `<itemNotFound code="404"><message>..</message></itemNotFound>`.
pub fn render_fault(name: &str, code: u16, message: &str) -> String {
    let mut writer = new_writer();

    let code = code.to_string();
    let root = BytesStart::new(name).with_attributes([("xmlns", XMLNS), ("code", code.as_str())]);
    writer.write_event(Event::Start(root)).expect("start fault");
    writer
        .write_event(Event::Start(BytesStart::new("message")))
        .expect("start message");
    writer
        .write_event(Event::Text(BytesText::new(message)))
        .expect("message text");
    writer
        .write_event(Event::End(BytesEnd::new("message")))
        .expect("end message");
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .expect("end fault");

    finish(writer)
}

fn new_writer() -> Writer<Cursor<Vec<u8>>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    writer
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

fn write_meta_element(writer: &mut Writer<Cursor<Vec<u8>>>, key: &str, value: &str, root: bool) {
    let mut start = BytesStart::new("meta");
    if root {
        start.push_attribute(("xmlns", XMLNS));
    }
    start.push_attribute(("key", key));
    writer.write_event(Event::Start(start)).expect("start meta");
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .expect("meta text");
    writer
        .write_event(Event::End(BytesEnd::new("meta")))
        .expect("end meta");
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Decode an XML request body into its structural form.
///
/// - `<metadata><meta key="k">v</meta>...</metadata>` becomes `{"metadata": {"k": "v"}}`
/// - `<meta key="k">v</meta>` becomes `{"meta": {"k": "v"}}`
///
/// Any other root element decodes to `{"<root>": {}}` and is rejected later
/// by the controller's shape checks.
pub fn parse_body(body: &[u8]) -> Result<Value, MetadataError> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();

    let mut root: Option<String> = None;
    let mut entries = Map::new();
    // Key of the <meta> element currently open, and its accumulated text.
    let mut current: Option<(String, String)> = None;
    // Number of open elements; `closed` is set once the root has ended.
    let mut depth = 0usize;
    let mut closed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if closed {
                    return Err(trailing_element(&name));
                }
                if depth == 0 {
                    if name == "meta" {
                        current = Some((meta_key(e)?, String::new()));
                    }
                    root = Some(name);
                } else if depth == 1 && name == "meta" && root.as_deref() == Some("metadata") {
                    current = Some((meta_key(e)?, String::new()));
                } else {
                    return Err(MetadataError::malformed(format!(
                        "unexpected element <{name}>"
                    )));
                }
                depth += 1;
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if closed {
                    return Err(trailing_element(&name));
                }
                if depth == 0 {
                    if name == "meta" {
                        entries.insert(meta_key(e)?, Value::String(String::new()));
                    }
                    root = Some(name);
                    closed = true;
                } else if depth == 1 && name == "meta" && root.as_deref() == Some("metadata") {
                    entries.insert(meta_key(e)?, Value::String(String::new()));
                } else {
                    return Err(MetadataError::malformed(format!(
                        "unexpected element <{name}>"
                    )));
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, ref mut text)) = current {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| MetadataError::malformed(format!("invalid XML text: {err}")))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some((_, ref mut text)) = current {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"meta" {
                    if let Some((key, text)) = current.take() {
                        entries.insert(key, Value::String(text));
                    }
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    closed = true;
                }
            }
            Ok(Event::Eof) => {
                if depth > 0 {
                    return Err(MetadataError::malformed(
                        "unexpected end of XML document",
                    ));
                }
                break;
            }
            Err(err) => {
                return Err(MetadataError::malformed(format!("invalid XML: {err}")));
            }
            _ => {}
        }
        buf.clear();
    }

    let root = root.ok_or_else(|| MetadataError::malformed("empty XML document"))?;
    let mut document = Map::new();
    document.insert(root, Value::Object(entries));
    Ok(Value::Object(document))
}

fn trailing_element(name: &str) -> MetadataError {
    MetadataError::malformed(format!("element <{name}> after the document root"))
}

/// Extract the `key` attribute of a `<meta>` element.
fn meta_key(element: &BytesStart<'_>) -> Result<String, MetadataError> {
    let attr = element
        .try_get_attribute("key")
        .map_err(|err| MetadataError::malformed(format!("invalid attribute: {err}")))?
        .ok_or_else(|| MetadataError::malformed("<meta> element without a key attribute"))?;
    let value = attr
        .unescape_value()
        .map_err(|err| MetadataError::malformed(format!("invalid attribute value: {err}")))?;
    Ok(value.into_owned())
}

// ── Tests ───────────────────────────────────────────────────────────
