//! Minimal XML element tree for SOAP responses.
//!
//! K_i: RAS responses are small documents; a full tree is cheap to build.
//! K_i: Elements are addressed by local name, so prefixes never matter.
//! B_i: The body is well-formed XML → Result

use crate::models::SoapError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::ops::Range;

/// An element with its text, attributes and children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Local name (prefix stripped)
    pub name: String,
    /// Attributes by local name; namespace declarations are dropped
    pub attributes: Vec<(String, String)>,
    /// Direct text content, unescaped
    pub text: String,
    pub children: Vec<XmlElement>,
    /// Byte range of the whole element in the source document
    span: Range<usize>,
}

impl XmlElement {
    fn open(start: &BytesStart<'_>, offset: usize) -> Result<Self, SoapError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| SoapError::Xml(e.to_string()))?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| SoapError::Xml(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
            span: offset..offset,
        })
    }

    /// Attribute value by local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `xsi:nil="true"`
    pub fn is_nil(&self) -> bool {
        self.attribute("nil") == Some("true")
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First non-nil child with the given local name.
    pub fn present_child(&self, name: &str) -> Option<&XmlElement> {
        self.child(name).filter(|c| !c.is_nil())
    }

    /// Follow a path of local names.
    pub fn find(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |el, name| el.child(name))
    }

    /// Trimmed text of a non-nil child.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.present_child(name).map(|c| c.text.trim())
    }

    /// Text of this element and all descendants, concatenated.
    pub fn text_content(&self) -> String {
        let mut out = self.text.trim().to_string();
        for child in &self.children {
            let inner = child.text_content();
            if !inner.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&inner);
            }
        }
        out
    }

    /// The element's original markup within `source`.
    pub fn raw<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.span.clone()).unwrap_or_default().trim()
    }
}

/// A parsed document that keeps its source for raw slicing.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub source: String,
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn parse(source: String) -> Result<Self, SoapError> {
        let root = parse(&source)?;
        Ok(Self { source, root })
    }
}

/// Parse a document into its root element.
pub fn parse(xml: &str) -> Result<XmlElement, SoapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let offset = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| SoapError::Xml(format!("at byte {offset}: {e}")))?;

        match event {
            Event::Start(start) => stack.push(XmlElement::open(&start, offset)?),
            Event::Empty(start) => {
                let mut el = XmlElement::open(&start, offset)?;
                el.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let mut el = stack
                    .pop()
                    .ok_or_else(|| SoapError::Xml("unexpected closing tag".to_string()))?;
                el.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let value = text.unescape().map_err(|e| SoapError::Xml(e.to_string()))?;
                    top.text.push_str(&value);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(SoapError::Xml(format!(
            "unclosed element <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| SoapError::Xml("empty document".to_string()))
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> Result<(), SoapError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_none() => *root = Some(el),
        None => return Err(SoapError::Xml("multiple root elements".to_string())),
    }
    Ok(())
}
