//! SOAP envelope and WS-Security header helpers

use crate::error::{SamlError, SamlResult};
use crate::saml::xml::{splice, XmlElement};
use uuid::Uuid;

pub const SOAP11_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

/// Add an empty `wsse:Security` header to a SOAP envelope, creating the
/// `Header` element if needed. An envelope that already has one is returned
/// unchanged.
pub fn insert_security_header(envelope: &str) -> SamlResult<String> {
    let root = XmlElement::parse_document(envelope)?;
    let soap_ns = envelope_namespace(&root)?;
    let soap_prefix = root
        .qname
        .split_once(':')
        .map_or(String::new(), |(p, _)| p.to_string());

    let mut security = String::from("<wsse:Security xmlns:wsse=\"");
    security.push_str(WSSE_NS);
    security.push_str("\" xmlns:wsu=\"");
    security.push_str(WSU_NS);
    security.push('"');
    if !soap_prefix.is_empty() {
        security.push(' ');
        security.push_str(&soap_prefix);
        security.push_str(":mustUnderstand=\"1\"");
    }
    security.push_str("></wsse:Security>");

    match root.child(soap_ns, "Header") {
        Some(header) => {
            if header.child(WSSE_NS, "Security").is_some() {
                return Ok(envelope.to_string());
            }
            let (doc, at) = expand_element(envelope, header)?;
            Ok(splice(&doc, at, &security))
        }
        None => {
            if root.start_tag_end == root.span.end {
                return Err(SamlError::Malformed("SOAP envelope is empty".to_string()));
            }
            let header_qname = qualified(&soap_prefix, "Header");
            let mut header = String::new();
            header.push('<');
            header.push_str(&header_qname);
            header.push('>');
            header.push_str(&security);
            header.push_str("</");
            header.push_str(&header_qname);
            header.push('>');
            Ok(splice(envelope, root.start_tag_end, &header))
        }
    }
}

/// Namespace of a SOAP 1.1 or 1.2 `Envelope` root.
pub(crate) fn envelope_namespace(root: &XmlElement) -> SamlResult<&'static str> {
    [SOAP11_ENV_NS, SOAP12_ENV_NS]
        .into_iter()
        .find(|ns| root.is(ns, "Envelope"))
        .ok_or_else(|| SamlError::Malformed(format!("{} is not a SOAP Envelope", root.qname)))
}

/// The `wsse:Security` element of an envelope.
pub(crate) fn security_header(root: &XmlElement) -> SamlResult<&XmlElement> {
    let soap_ns = envelope_namespace(root)?;
    root.child(soap_ns, "Header")
        .and_then(|h| h.child(WSSE_NS, "Security"))
        .ok_or_else(|| SamlError::NotFound("No wsse:Security header in envelope".to_string()))
}

pub(crate) fn body(root: &XmlElement) -> SamlResult<&XmlElement> {
    let soap_ns = envelope_namespace(root)?;
    root.child(soap_ns, "Body")
        .ok_or_else(|| SamlError::NotFound("No SOAP Body in envelope".to_string()))
}

/// Make sure the SOAP Body carries an ID, returning the (possibly updated)
/// document and the ID.
pub(crate) fn ensure_body_id(doc: &str) -> SamlResult<(String, String)> {
    let root = XmlElement::parse_document(doc)?;
    let body = body(&root)?;
    if let Some(id) = body.id() {
        return Ok((doc.to_string(), id.to_string()));
    }

    let id = format!("_body_{}", Uuid::new_v4());
    let mut attrs = String::from(" xmlns:wsu=\"");
    attrs.push_str(WSU_NS);
    attrs.push_str("\" wsu:Id=\"");
    attrs.push_str(&id);
    attrs.push('"');

    let is_empty = body.start_tag_end == body.span.end;
    let at = body.start_tag_end - if is_empty { 2 } else { 1 };
    Ok((splice(doc, at, &attrs), id))
}

/// Offset where content can be inserted as the first child of `element`.
/// An empty element (`<x/>`) is rewritten to `<x></x>` first.
pub(crate) fn expand_element(doc: &str, element: &XmlElement) -> SamlResult<(String, usize)> {
    if element.start_tag_end != element.span.end {
        return Ok((doc.to_string(), element.start_tag_end));
    }

    let raw = doc
        .get(element.span.clone())
        .ok_or_else(|| SamlError::Malformed("Element span outside document".to_string()))?;
    let open = raw
        .strip_suffix("/>")
        .ok_or_else(|| SamlError::Malformed(format!("Unexpected form of {}", element.qname)))?
        .trim_end();

    let mut expanded = String::with_capacity(raw.len() + element.qname.len() + 3);
    expanded.push_str(open);
    expanded.push('>');
    let insert_at = element.span.start + expanded.len();
    expanded.push_str("</");
    expanded.push_str(&element.qname);
    expanded.push('>');

    let mut out = String::with_capacity(doc.len() + expanded.len());
    out.push_str(&doc[..element.span.start]);
    out.push_str(&expanded);
    out.push_str(&doc[element.span.end..]);
    Ok((out, insert_at))
}

fn qualified(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{prefix}:{local}")
    }
}
