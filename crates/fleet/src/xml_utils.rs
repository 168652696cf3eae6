//! Owned XML tree support built on quick-xml.
//!
//! Libvirt domain descriptors are order-sensitive nested documents that we
//! need to edit in place: retarget a disk source, delete cdrom entries,
//! append new devices. This module parses a descriptor into an owned
//! [`XmlElement`] tree, supports structural edits, and serializes the result
//! back to a self-contained document. Attribute order is preserved so that
//! serialization is deterministic.

use std::io::Cursor;

use color_eyre::{eyre::eyre, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

/// A single element in an owned, mutable XML tree.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    /// Element name, e.g. `disk`.
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content (libvirt descriptors have no mixed content).
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create an element with no attributes, text, or children.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Create an element with the given attributes.
    pub fn with_attrs(name: &str, attrs: &[(&str, &str)]) -> Self {
        let mut elem = Self::new(name);
        for (key, value) in attrs {
            elem.attributes.push(((*key).to_owned(), (*value).to_owned()));
        }
        elem
    }

    /// Get an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing an existing value or appending a new one.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_owned(),
            None => self.attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    /// Remove an attribute, returning its previous value if present.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Replace the element's text content.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Mutable access to the first direct child with the given name.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    /// Walk a path of direct-child names, e.g. `["cpu", "topology"]`.
    pub fn find_path(&self, path: &[&str]) -> Option<&XmlElement> {
        let mut current = self;
        for name in path {
            current = current.child(name)?;
        }
        Some(current)
    }

    /// Mutable variant of [`XmlElement::find_path`].
    pub fn find_path_mut(&mut self, path: &[&str]) -> Option<&mut XmlElement> {
        let mut current = self;
        for name in path {
            current = current.child_mut(name)?;
        }
        Some(current)
    }

    /// Serialize the tree rooted at this element to a standalone document
    /// with an XML declaration.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| eyre!("Failed to write XML declaration: {}", e))?;
        write_element(&mut writer, self)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| eyre!("Failed to convert XML to string: {}", e))
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, elem: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(elem.name.as_str());
    for (key, value) in &elem.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if elem.children.is_empty() && elem.text.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| eyre!("Failed to write empty element: {}", e))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| eyre!("Failed to write start element: {}", e))?;
    if !elem.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&elem.text)))
            .map_err(|e| eyre!("Failed to write text: {}", e))?;
    }
    for child in &elem.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(elem.name.as_str())))
        .map_err(|e| eyre!("Failed to write end element: {}", e))?;
    Ok(())
}

/// Parse an XML document into an owned element tree.
pub fn parse_xml(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let node = element_from_start(&e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                } else if root.is_none() {
                    root = Some(node);
                }
            }
            Ok(Event::End(_)) => {
                if let Some(completed) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(completed);
                    } else {
                        root = Some(completed);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| eyre!("Failed to unescape text: {}", e))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(eyre!("Failed to parse XML: {}", e)),
            // Declarations, comments, PIs and CDATA are not meaningful in
            // libvirt descriptors.
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| eyre!("No root element found in XML"))
}

fn element_from_start(e: &BytesStart) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| eyre!("Malformed attribute: {}", e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| eyre!("Malformed attribute value: {}", e))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}
