//! Span-preserving XML element tree
//!
//! Signatures are computed over the exact bytes of an element as it appears
//! in the document, so every element remembers its byte range in the source.
//! Namespace declarations are tracked per element so a fragment cut out of
//! its document can be re-rooted with the declarations it inherits.

use crate::error::{SamlError, SamlResult};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Timestamp format used for every SAML dateTime attribute
pub const SAML_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Maximum element nesting accepted from untrusted input
const MAX_DEPTH: usize = 64;

/// An element of a parsed document.
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local` or `local`)
    pub qname: String,
    /// Attributes in document order, namespace declarations excluded
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated direct text content (unescaped)
    pub text: String,
    /// Byte range of the whole element in the source document
    pub span: Range<usize>,
    /// Byte offset just past the start tag
    pub start_tag_end: usize,
    /// Namespace declarations made on this element (prefix `""` = default)
    pub declared: BTreeMap<String, String>,
    /// Namespaces in scope from ancestors
    pub inherited: BTreeMap<String, String>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse_document(xml: &str) -> SamlResult<XmlElement> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        // Positions are taken after each event: the start of a tag is its end
        // minus the raw tag content plus the `<`, `>` (and `/`) delimiters.
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(SamlError::Malformed(format!(
                            "Element nesting exceeds {MAX_DEPTH} levels"
                        )));
                    }
                    let end = reader.buffer_position() as usize;
                    let start = tag_start(end, e.len() + 2)?;
                    let element = open_element(&e, start, end, stack.last())?;
                    stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let end = reader.buffer_position() as usize;
                    let start = tag_start(end, e.len() + 3)?;
                    let element = open_element(&e, start, end, stack.last())?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::End(_)) => {
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| SamlError::Malformed("Unbalanced end tag".to_string()))?;
                    element.span.end = reader.buffer_position() as usize;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::Text(t)) => {
                    if let Some(top) = stack.last_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| SamlError::Malformed(format!("Invalid text: {e}")))?;
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Ok(Event::DocType(_)) => {
                    return Err(SamlError::Malformed(
                        "DOCTYPE declarations are not accepted".to_string(),
                    ));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SamlError::Malformed(format!("XML parse error: {e}")));
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::Malformed("Unclosed element".to_string()));
        }
        root.ok_or_else(|| SamlError::Malformed("Document has no root element".to_string()))
    }

    /// Local part of the qualified name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        local_part(&self.qname)
    }

    /// Namespace URI of this element, if its prefix is bound.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.lookup_namespace(prefix_of(&self.qname))
    }

    fn lookup_namespace(&self, prefix: &str) -> Option<&str> {
        self.declared
            .get(prefix)
            .or_else(|| self.inherited.get(prefix))
            .map(String::as_str)
    }

    /// Whether this element has the given namespace and local name.
    #[must_use]
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local_name() == local && self.namespace() == Some(namespace)
    }

    /// Attribute value by qualified name, falling back to local name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| self.attributes.iter().find(|(k, _)| local_part(k) == name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of an `ID` / `Id` / `wsu:Id` attribute.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| matches!(local_part(k), "ID" | "Id"))
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given namespace and local name.
    #[must_use]
    pub fn child(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(namespace, local))
    }

    /// All direct children with the given namespace and local name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, local))
    }

    /// All elements of the subtree (self included) in document order.
    #[must_use]
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Every element of the subtree carrying the given ID.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Vec<&XmlElement> {
        self.descendants()
            .into_iter()
            .filter(|e| e.id() == Some(id))
            .collect()
    }

    /// Whether `other` lies inside this element's span.
    #[must_use]
    pub fn contains(&self, other: &XmlElement) -> bool {
        self.span.start <= other.span.start && other.span.end <= self.span.end
    }

    /// The element's source text, optionally with a nested element cut out,
    /// re-rooted with the inherited namespace declarations it actually uses.
    pub fn detached_fragment(&self, doc: &str, exclude: Option<&XmlElement>) -> SamlResult<String> {
        let raw = doc
            .get(self.span.clone())
            .ok_or_else(|| SamlError::Malformed("Element span outside document".to_string()))?;

        let mut fragment = match exclude.filter(|x| self.contains(x) && x.span != self.span) {
            Some(x) => {
                let from = x.span.start - self.span.start;
                let to = x.span.end - self.span.start;
                let mut s = String::with_capacity(raw.len());
                s.push_str(&raw[..from]);
                s.push_str(&raw[to..]);
                s
            }
            None => raw.to_string(),
        };

        let mut unbound = BTreeSet::new();
        collect_unbound(self, &BTreeMap::new(), exclude, &mut unbound);

        let mut declarations = String::new();
        for prefix in unbound {
            if let Some(uri) = self.inherited.get(&prefix) {
                declarations.push(' ');
                if prefix.is_empty() {
                    declarations.push_str("xmlns");
                } else {
                    declarations.push_str("xmlns:");
                    declarations.push_str(&prefix);
                }
                declarations.push_str("=\"");
                declarations.push_str(&xml_escape(uri));
                declarations.push('"');
            }
        }
        if !declarations.is_empty() {
            let insert_at = 1 + self.qname.len();
            fragment.insert_str(insert_at, &declarations);
        }

        Ok(fragment)
    }
}

fn collect<'a>(element: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    out.push(element);
    for child in &element.children {
        collect(child, out);
    }
}

/// Prefixes used in the subtree but not declared within it.
fn collect_unbound(
    element: &XmlElement,
    scope: &BTreeMap<String, String>,
    exclude: Option<&XmlElement>,
    unbound: &mut BTreeSet<String>,
) {
    if let Some(x) = exclude {
        if x.span == element.span {
            return;
        }
    }

    let mut scope = scope.clone();
    scope.extend(element.declared.clone());

    let element_prefix = prefix_of(&element.qname);
    if !scope.contains_key(element_prefix) && element.inherited.contains_key(element_prefix) {
        unbound.insert(element_prefix.to_string());
    }
    for (name, _) in &element.attributes {
        let prefix = prefix_of(name);
        if !prefix.is_empty() && prefix != "xml" && !scope.contains_key(prefix) {
            unbound.insert(prefix.to_string());
        }
    }

    for child in &element.children {
        collect_unbound(child, &scope, exclude, unbound);
    }
}

fn open_element(
    e: &BytesStart<'_>,
    start: usize,
    start_tag_end: usize,
    parent: Option<&XmlElement>,
) -> SamlResult<XmlElement> {
    let qname = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| SamlError::Malformed(format!("Invalid element name: {err}")))?
        .to_string();

    let mut attributes = Vec::new();
    let mut declared = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::Malformed(format!("Invalid attribute: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| SamlError::Malformed(format!("Invalid attribute name: {err}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| SamlError::Malformed(format!("Invalid attribute value: {err}")))?
            .to_string();

        if key == "xmlns" {
            declared.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.insert(prefix.to_string(), value);
        } else {
            attributes.push((key, value));
        }
    }

    let inherited = parent
        .map(|p| {
            let mut scope = p.inherited.clone();
            scope.extend(p.declared.clone());
            scope
        })
        .unwrap_or_default();

    Ok(XmlElement {
        qname,
        attributes,
        children: Vec::new(),
        text: String::new(),
        span: start..start_tag_end,
        start_tag_end,
        declared,
        inherited,
    })
}

fn tag_start(end: usize, raw_len: usize) -> SamlResult<usize> {
    end.checked_sub(raw_len)
        .ok_or_else(|| SamlError::Malformed("Inconsistent tag position".to_string()))
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> SamlResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(SamlError::Malformed(
            "Document has more than one root element".to_string(),
        ))
    }
}

fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(prefix, _)| prefix)
}

/// XML escape special characters
#[must_use]
pub fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a timestamp the way SAML dateTime attributes are written.
#[must_use]
pub fn format_datetime(at: DateTime<Utc>) -> String {
    at.format(SAML_DATETIME_FORMAT).to_string()
}

/// Parse a SAML dateTime attribute.
pub fn parse_datetime(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::Malformed(format!("Invalid dateTime '{value}': {e}")))
}

/// Insert `insertion` into `doc` at byte offset `at`.
#[must_use]
pub fn splice(doc: &str, at: usize, insertion: &str) -> String {
    let mut out = String::with_capacity(doc.len() + insertion.len());
    out.push_str(&doc[..at]);
    out.push_str(insertion);
    out.push_str(&doc[at..]);
    out
}
