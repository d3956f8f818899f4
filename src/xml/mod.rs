//! Minimal namespace-aware XML tree for SAML protocol messages.
//!
//! SAML responses are small documents that have to be inspected twice: once
//! to verify their XML digital signatures and once to read the asserted
//! identity. A [`Document`] keeps the source text next to an owned tree of
//! [`Element`]s with resolved namespaces; every element remembers the byte
//! range it was parsed from so the signature verifier ([`dsig`]) can hand
//! exactly those bytes to the XML-DSig implementation.
//!
//! Parsing is deliberately strict:
//! - DTDs are rejected outright (no entity expansion, no XXE)
//! - unbound namespace prefixes are errors
//! - nesting deeper than [`MAX_DEPTH`] is an error
//! - comments and processing instructions are dropped

pub mod dsig;

use std::{collections::BTreeMap, ops::Range};

use quick_xml::{
    Reader,
    escape::escape,
    events::{BytesStart, Event},
};

/// SAML 2.0 protocol namespace (`samlp:`).
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 assertion namespace (`saml:`).
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// XML digital signature namespace (`ds:`).
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// The namespace implicitly bound to the `xml:` prefix.
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

/// Deepest element nesting accepted. SAML responses stay around ten levels;
/// tree walks recurse, so this bounds their stack use.
pub const MAX_DEPTH: usize = 128;

/// Errors produced while parsing a document.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(String),

    #[error("document type declarations are not allowed")]
    DocType,

    #[error("unbound namespace prefix '{0}'")]
    UnboundPrefix(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("document has more than one root element")]
    MultipleRoots,

    #[error("document is not valid UTF-8")]
    Utf8,

    #[error("elements nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// An attribute with its namespace resolved.
///
/// Namespace declarations (`xmlns`, `xmlns:*`) are not attributes; they are
/// kept in [`Element::namespace_decls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    /// The attribute name as written in the document.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }
}

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data with entities and CDATA sections already resolved.
    Text(String),
}

/// An element with its namespace resolved and its in-scope namespace map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Declarations made on this element, `None` being the default namespace.
    pub namespace_decls: Vec<(Option<String>, String)>,
    /// Every prefix bound at this element (inherited + declared). The default
    /// namespace is stored under the empty string.
    pub scope: BTreeMap<String, String>,
    pub children: Vec<Node>,
    /// Byte range of the element, start tag to end tag, in [`Document::source`].
    pub span: Range<usize>,
}

impl Element {
    /// The element name as written in the document.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// Whether this element has the given namespace URI and local name.
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Value of a namespace-qualified attribute.
    pub fn attr_ns(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Direct children with the given namespace and local name, in document order.
    pub fn children_named<'a, 'n>(
        &'a self,
        namespace: &'n str,
        local_name: &'n str,
    ) -> impl Iterator<Item = &'a Element> + use<'a, 'n> {
        self.child_elements()
            .filter(move |child| child.is(namespace, local_name))
    }

    /// First direct child with the given namespace and local name.
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements()
            .find(|child| child.is(namespace, local_name))
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Visit this element and every descendant element, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in self.child_elements() {
            child.walk(visit);
        }
    }
}

/// A parsed document: the root element plus the text it was parsed from.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source text with line endings normalized; element spans index into it.
    pub source: String,
    pub root: Element,
}

impl Document {
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        // XML processors normalize line endings before anything else sees the text.
        let source = if input.contains('\r') {
            input.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            input.to_string()
        };
        let root = parse_normalized(&source)?;
        Ok(Self { source, root })
    }

    /// `element` as a document of its own.
    ///
    /// The original bytes are kept as they are; namespaces the element
    /// inherits from its ancestors are declared on its start tag so the
    /// fragment means the same thing outside its parent.
    pub fn standalone(&self, element: &Element) -> Result<String, XmlError> {
        let fragment = self
            .source
            .get(element.span.clone())
            .ok_or_else(|| XmlError::Syntax("element outside of document".to_string()))?;
        let name_end = 1 + element.qualified_name().len();
        if !fragment.is_char_boundary(name_end) {
            return Err(XmlError::Syntax("element outside of document".to_string()));
        }

        let mut inherited = String::new();
        for (prefix, uri) in &element.scope {
            let declared_here = element
                .namespace_decls
                .iter()
                .any(|(declared, _)| declared.as_deref().unwrap_or_default() == prefix);
            if declared_here || uri.is_empty() {
                continue;
            }
            let name = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{prefix}")
            };
            inherited.push_str(&format!(r#" {name}="{}""#, escape(uri)));
        }

        let (start, rest) = fragment.split_at(name_end);
        Ok(format!("{start}{inherited}{rest}"))
    }
}

/// Parse a document and return its root element.
pub fn parse(input: &str) -> Result<Element, XmlError> {
    Document::parse(input).map(|document| document.root)
}

fn parse_normalized(input: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let offset = position(&reader);
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Syntax(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::TooDeep);
                }
                let element = open_element(&start, stack.last().map(|e| &e.scope), offset)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::TooDeep);
                }
                let mut element = open_element(&start, stack.last().map(|e| &e.scope), offset)?;
                element.span.end = position(&reader);
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Syntax("unexpected closing tag".to_string()))?;
                element.span.end = position(&reader);
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| XmlError::Syntax(e.to_string()))?;
                push_text(&mut stack, &value)?;
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                let value = std::str::from_utf8(&bytes).map_err(|_| XmlError::Utf8)?;
                push_text(&mut stack, value)?;
            }
            Event::DocType(_) => return Err(XmlError::DocType),
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::Syntax("unclosed element".to_string()));
    }

    root.ok_or(XmlError::NoRoot)
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_some() => Err(XmlError::MultipleRoots),
        None => {
            *root = Some(element);
            Ok(())
        }
    }
}

fn push_text(stack: &mut [Element], value: &str) -> Result<(), XmlError> {
    let Some(parent) = stack.last_mut() else {
        if value.trim().is_empty() {
            return Ok(());
        }
        return Err(XmlError::Syntax("text outside of root element".to_string()));
    };

    // Adjacent text and CDATA form a single text node.
    if let Some(Node::Text(previous)) = parent.children.last_mut() {
        previous.push_str(value);
    } else {
        parent.children.push(Node::Text(value.to_string()));
    }
    Ok(())
}

fn open_element(
    start: &BytesStart<'_>,
    parent_scope: Option<&BTreeMap<String, String>>,
    offset: usize,
) -> Result<Element, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| XmlError::Utf8)?
        .to_string();

    let mut scope = parent_scope.cloned().unwrap_or_default();
    let mut namespace_decls = Vec::new();
    let mut raw_attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XmlError::Syntax(e.to_string()))?;
        let key = std::str::from_utf8(attribute.key.as_ref()).map_err(|_| XmlError::Utf8)?;
        let value = attribute_value(&attribute.value)?;

        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
            namespace_decls.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value.clone());
            namespace_decls.push((Some(prefix.to_string()), value));
        } else {
            raw_attributes.push((key.to_string(), value));
        }
    }

    let (prefix, local_name) = split_name(&name);
    let namespace = match prefix {
        None => scope.get("").filter(|uri| !uri.is_empty()).cloned(),
        Some(prefix) => Some(resolve_prefix(&scope, prefix)?),
    };

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attr_prefix, attr_local) = split_name(&key);
        // Unprefixed attributes are in no namespace, regardless of the default.
        let attr_namespace = match attr_prefix {
            None => None,
            Some(p) => Some(resolve_prefix(&scope, p)?),
        };
        attributes.push(Attribute {
            prefix: attr_prefix.map(str::to_string),
            local_name: attr_local.to_string(),
            namespace: attr_namespace,
            value,
        });
    }

    Ok(Element {
        prefix: prefix.map(str::to_string),
        local_name: local_name.to_string(),
        namespace,
        attributes,
        namespace_decls,
        scope,
        children: Vec::new(),
        span: offset..offset,
    })
}

fn resolve_prefix(scope: &BTreeMap<String, String>, prefix: &str) -> Result<String, XmlError> {
    if prefix == "xml" {
        return Ok(NS_XML.to_string());
    }
    scope
        .get(prefix)
        .filter(|uri| !uri.is_empty())
        .cloned()
        .ok_or_else(|| XmlError::UnboundPrefix(prefix.to_string()))
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Attribute-value normalization: literal whitespace becomes a space, then
/// references are resolved (so `&#10;` survives as a newline).
fn attribute_value(raw: &[u8]) -> Result<String, XmlError> {
    let raw = std::str::from_utf8(raw).map_err(|_| XmlError::Utf8)?;
    let normalized: String = raw
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    quick_xml::escape::unescape(&normalized)
        .map(|value| value.into_owned())
        .map_err(|e| XmlError::Syntax(e.to_string()))
}
