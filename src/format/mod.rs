//! File format handling for the document.
//!
//! Provides version-aware parsing and serialization of the XML document.

use std::borrow::Cow;
use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::document::{Document, Version};
use crate::error::DataError;

pub mod v1;

/// Name of the root element.
pub const ROOT: &str = "cardnest";
/// Latest major format version this build reads and writes.
pub const CURRENT_MAJOR: u32 = 0;

/// A parsed XML element, kept only until it is mapped onto document types.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn required_attr(&self, name: &str) -> Result<&str, DataError> {
        self.attr(name).ok_or_else(|| {
            DataError::Structure(format!("<{}> lacks attribute '{name}'", self.name))
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn required_child(&self, name: &str) -> Result<&Element, DataError> {
        self.child(name).ok_or_else(|| {
            DataError::Structure(format!("<{}> lacks element <{name}>", self.name))
        })
    }
}

pub(crate) fn xml_error(e: impl Display) -> DataError {
    DataError::Xml(e.to_string())
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, DataError> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(xml_error)?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

/// Builds the element tree of an XML text.
pub(crate) fn parse_tree(xml: &str) -> Result<Element, DataError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        match event {
            Event::Start(start) => stack.push(start_element(&start)?),
            Event::Empty(start) => {
                let element = start_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => set_root(&mut root, element)?,
                }
            }
            Event::Text(text) => {
                let text: Cow<'_, str> = text.unescape().map_err(xml_error)?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DataError::Xml("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => set_root(&mut root, element)?,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(DataError::Xml("unexpected end of document".into()));
    }
    root.ok_or_else(|| DataError::Xml("document has no root element".into()))
}

fn set_root(root: &mut Option<Element>, element: Element) -> Result<(), DataError> {
    if root.is_some() {
        return Err(DataError::Xml("more than one root element".into()));
    }
    *root = Some(element);
    Ok(())
}

/// Parses a stored document.
///
/// # Errors
///
/// Returns an error if:
/// - The bytes are not well-formed UTF-8 XML
/// - The root element is not `<cardnest>`
/// - The document was written by an incompatible future version
/// - Required sections or attributes are missing or malformed
pub fn parse(data: &[u8]) -> Result<Document, DataError> {
    let xml = std::str::from_utf8(data)
        .map_err(|_| DataError::MalformedInput("document is not utf-8".into()))?;
    let root = parse_tree(xml)?;

    if root.name != ROOT {
        return Err(DataError::Structure(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    let version = v1::parse_version(root.required_child(v1::APP_DATA)?)?;
    match version.major {
        0..=CURRENT_MAJOR => v1::parse(&root),
        _ => Err(DataError::Structure(format!(
            "unsupported document version {version}"
        ))),
    }
}

/// Serializes a document.
pub fn serialize(document: &Document) -> Result<Vec<u8>, DataError> {
    match document.app_data.version {
        Version { major, .. } if major <= CURRENT_MAJOR => v1::serialize(document),
        version => Err(DataError::Structure(format!(
            "unsupported document version {version}"
        ))),
    }
}
