//! XML to dictionary-tree conversion.
//!
//! Elements holding only text become [`FeedValue::Text`], empty elements
//! [`FeedValue::Empty`], elements with children a [`FeedValue::Node`], and
//! repeated sibling elements collapse into a [`FeedValue::List`]. Attributes
//! and mixed content are ignored; the listing feed uses neither.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::error::FeedError;

const ROOT_ELEMENT: &str = "ADS";
const RECORD_ELEMENT: &str = "AD";

#[derive(Debug, Clone, PartialEq)]
pub enum FeedValue {
    Empty,
    Text(String),
    Node(FeedNode),
    List(Vec<FeedValue>),
}

impl FeedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// View a value that may be either a single item or a repeated one as a
    /// list of optional texts. Empty or structured entries are `None`.
    pub fn texts(&self) -> Vec<Option<&str>> {
        match self {
            FeedValue::List(items) => items.iter().map(FeedValue::as_text).collect(),
            other => vec![other.as_text()],
        }
    }
}

/// Children of one element, keyed by tag name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedNode {
    children: BTreeMap<String, FeedValue>,
}

impl FeedNode {
    pub fn get(&self, key: &str) -> Option<&FeedValue> {
        self.children.get(key)
    }

    /// Text content of a child element, if it holds plain text.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FeedValue::as_text)
    }

    pub fn node(&self, key: &str) -> Option<&FeedNode> {
        match self.get(key) {
            Some(FeedValue::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Add a child, turning a repeated tag into a list.
    pub fn insert(&mut self, key: String, value: FeedValue) {
        match self.children.remove(&key) {
            None => {
                self.children.insert(key, value);
            }
            Some(FeedValue::List(mut items)) => {
                items.push(value);
                self.children.insert(key, FeedValue::List(items));
            }
            Some(existing) => {
                self.children.insert(key, FeedValue::List(vec![existing, value]));
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<FeedValue> {
        self.children.remove(key)
    }
}

/// An element being built while its end tag has not been seen yet.
struct Frame {
    name: String,
    node: FeedNode,
    text: String,
}

impl Frame {
    fn open(name: String) -> Self {
        Self {
            name,
            node: FeedNode::default(),
            text: String::new(),
        }
    }

    fn finish(self) -> (String, FeedValue) {
        let value = if !self.node.is_empty() {
            FeedValue::Node(self.node)
        } else if self.text.trim().is_empty() {
            FeedValue::Empty
        } else {
            FeedValue::Text(self.text)
        };
        (self.name, value)
    }
}

fn parse_error(reader: &Reader<&[u8]>, msg: impl std::fmt::Display) -> FeedError {
    FeedError::Parse(format!("at byte {}: {}", reader.buffer_position(), msg))
}

fn element_name(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String, FeedError> {
    reader
        .decoder()
        .decode(raw)
        .map(|name| name.into_owned())
        .map_err(|err| parse_error(reader, err))
}

/// Parse an XML document into a tree whose single child is the root element.
///
/// Text is decoded with the encoding named in the XML declaration (or a
/// byte-order mark), falling back to UTF-8.
pub fn parse_document(input: &[u8]) -> Result<FeedNode, FeedError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = vec![Frame::open(String::new())];

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&reader, e.name().as_ref())?;
                stack.push(Frame::open(name));
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&reader, e.name().as_ref())?;
                if let Some(top) = stack.last_mut() {
                    top.node.insert(name, FeedValue::Empty);
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| parse_error(&reader, err))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let data = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| parse_error(&reader, err))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&data);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(parse_error(&reader, "unexpected closing tag"));
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.finish();
                    if let Some(parent) = stack.last_mut() {
                        parent.node.insert(name, value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(parse_error(&reader, e)),
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(parse_error(&reader, "unclosed element at end of document"));
    }
    let document = stack.pop().map(|f| f.node).unwrap_or_default();
    if document.is_empty() {
        return Err(FeedError::Parse("document has no root element".to_string()));
    }
    Ok(document)
}

/// Pull the listing records (`ADS/AD`) out of a parsed document.
///
/// A single `AD` is accepted as a one-record feed; an `ADS` root with no
/// records is a legitimately empty feed. A document without an `ADS` root is
/// rejected so a wrong URL can't wipe the store.
pub fn extract_records(mut document: FeedNode) -> Result<Vec<FeedNode>, FeedError> {
    let mut root = match document.remove(ROOT_ELEMENT) {
        Some(FeedValue::Node(n)) => n,
        Some(FeedValue::Empty) => return Ok(Vec::new()),
        _ => {
            return Err(FeedError::Parse(format!(
                "missing <{}> root element",
                ROOT_ELEMENT
            )))
        }
    };

    let values = match root.remove(RECORD_ELEMENT) {
        None => Vec::new(),
        Some(FeedValue::List(items)) => items,
        Some(single) => vec![single],
    };

    let mut records = Vec::with_capacity(values.len());
    for value in values {
        match value {
            FeedValue::Node(n) => records.push(n),
            _ => tracing::warn!("Skipping <{}> entry without fields", RECORD_ELEMENT),
        }
    }
    Ok(records)
}
