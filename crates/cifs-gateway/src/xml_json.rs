//! XML to JSON conversion.
//!
//! Mapping: an element becomes a property named after the element; an
//! element with neither attributes nor children maps to its text as a
//! string (`""` when empty); otherwise it maps to an object holding its
//! attributes and children, with any text under `"content"`. Repeated
//! sibling names collapse into an array in document order. Values are
//! never coerced: `<id>1</id>` yields `"1"`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// Property that receives the text of elements that also have attributes
/// or children.
pub const CONTENT_KEY: &str = "content";

fn xml_error(reason: impl std::fmt::Display) -> GatewayError {
    GatewayError::XmlParse {
        reason: reason.to_string(),
    }
}

struct Frame {
    name: String,
    props: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(xml_error)?
            .to_string();
        let mut props = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(xml_error)?
                .to_string();
            let value = attr.unescape_value().map_err(xml_error)?.into_owned();
            insert_child(&mut props, key, Value::String(value));
        }
        Ok(Self {
            name,
            props,
            text: String::new(),
        })
    }

    fn into_value(self) -> (String, Value) {
        if self.props.is_empty() {
            return (self.name, Value::String(self.text));
        }
        let mut props = self.props;
        if !self.text.is_empty() {
            insert_child(&mut props, CONTENT_KEY.to_string(), Value::String(self.text));
        }
        (self.name, Value::Object(props))
    }
}

/// Adds `value` under `key`, turning repeated keys into an array.
fn insert_child(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

fn close(frame: Frame, stack: &mut [Frame], document: &mut Map<String, Value>) {
    let (name, value) = frame.into_value();
    match stack.last_mut() {
        Some(parent) => insert_child(&mut parent.props, name, value),
        None => {
            document.insert(name, value);
        }
    }
}

/// Converts a complete XML document into a JSON object keyed by the root
/// element's name.
pub fn xml_to_json(xml: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut document = Map::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            xml_error(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;
        match event {
            Event::Start(start) => {
                if stack.is_empty() && !document.is_empty() {
                    return Err(xml_error("multiple root elements"));
                }
                stack.push(Frame::open(&start)?);
            }
            Event::Empty(start) => {
                if stack.is_empty() && !document.is_empty() {
                    return Err(xml_error("multiple root elements"));
                }
                let frame = Frame::open(&start)?;
                close(frame, &mut stack, &mut document);
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| xml_error("closing tag without matching opening tag"))?;
                close(frame, &mut stack, &mut document);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(xml_error("text outside the root element")),
                }
            }
            Event::CData(data) => {
                let data = data.into_inner();
                let text = std::str::from_utf8(&data).map_err(xml_error)?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(text),
                    None => return Err(xml_error("CDATA outside the root element")),
                }
            }
            Event::Eof => break,
            // declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(format!(
            "unexpected end of document, <{}> not closed",
            open.name
        )));
    }
    if document.is_empty() {
        return Err(xml_error("document has no root element"));
    }
    Ok(document)
}
