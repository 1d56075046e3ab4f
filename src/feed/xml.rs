//! A minimal namespace-aware element tree over `quick-xml`.
//!
//! Feed pages are small and their entries are read field by field, so the
//! parser materializes the document once and the feed code walks it with
//! namespace-qualified lookups.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use thiserror::Error;

/// SEC-003: Maximum element nesting accepted from a feed document.
const MAX_XML_DEPTH: usize = 64;

/// Errors that can occur while building an element tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// The document is not well-formed.
    #[error("XML parse error: {0}")]
    Malformed(String),
    /// SEC-003: nesting depth exceeds safety limit.
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
    /// The document contained no root element.
    #[error("XML document has no root element")]
    NoRoot,
}

/// An attribute with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Resolved namespace URI; `None` for unprefixed attributes.
    pub namespace: Option<String>,
    pub local_name: String,
    /// Qualified name as written, e.g. `xml:base`.
    pub raw_name: String,
    pub value: String,
}

/// An element with resolved namespace, attributes, text and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub local_name: String,
    pub attributes: Vec<XmlAttribute>,
    /// Concatenated direct text and CDATA content.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }

    /// First direct child with this qualified name.
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    /// All direct children with this qualified name, in document order.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, local_name))
    }

    /// Text of the first matching child, if present.
    pub fn child_text(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.child(namespace, local_name).map(|c| c.text.as_str())
    }

    /// Value of an unprefixed attribute, matched by local name.
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Value of an attribute matched by its name as written (`xml:base`).
    pub fn raw_attr(&self, raw_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.raw_name == raw_name)
            .map(|a| a.value.as_str())
    }
}

/// Parses a document and returns its root element.
///
/// # Errors
///
/// Returns [`XmlError`] when the document is not well-formed, nests deeper
/// than the safety limit, or has no root element.
///
/// # Security
///
/// `quick-xml` (0.37) does not expand `<!ENTITY>` declarations; custom
/// entity references fail to unescape and surface as [`XmlError::Malformed`].
pub fn parse_document(bytes: &[u8]) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let (namespace, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| XmlError::Malformed(e.to_string()))?;
        let namespace = resolved_namespace(namespace);

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                let element = start_element(&reader, &e, namespace)?;
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&reader, &e, namespace)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| XmlError::Malformed(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Malformed("unexpected end of document".into()));
    }
    root.ok_or(XmlError::NoRoot)
}

fn resolved_namespace(result: ResolveResult<'_>) -> Option<String> {
    match result {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

fn start_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
) -> Result<XmlElement, XmlError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Malformed(e.to_string()))?;
        let (attr_ns, local) = reader.resolve_attribute(attr.key);
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| XmlError::Malformed(e.to_string()))?;
        attributes.push(XmlAttribute {
            namespace: resolved_namespace(attr_ns),
            local_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            raw_name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value: value.into_owned(),
        });
    }

    Ok(XmlElement {
        namespace,
        local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::Malformed("multiple root elements".into())),
    }
    Ok(())
}
