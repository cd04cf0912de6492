//! XML-DSig primitives: algorithm registry, canonicalization, `SignedInfo`
//! construction and parsing of received `ds:Signature` elements.

use crate::error::{SamlError, SamlResult};
use crate::saml::xml::{xml_escape, XmlElement};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};
use std::fmt;
use xml_canonicalization::Canonicalizer;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const C14N_EXCL_OMIT_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const C14N_OMIT_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

/// Canonicalization methods accepted on received signatures
const ACCEPTED_C14N: [&str; 2] = [C14N_EXCL_OMIT_COMMENTS, C14N_OMIT_COMMENTS];

/// Digest algorithm of a signature reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const SHA1_URI: &'static str = "http://www.w3.org/2000/09/xmldsig#sha1";
    pub const SHA256_URI: &'static str = "http://www.w3.org/2001/04/xmlenc#sha256";
    pub const SHA384_URI: &'static str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
    pub const SHA512_URI: &'static str = "http://www.w3.org/2001/04/xmlenc#sha512";

    /// Look up an algorithm by its XML-DSig identifier.
    pub fn from_uri(uri: &str) -> SamlResult<Self> {
        match uri {
            Self::SHA1_URI => Ok(Self::Sha1),
            Self::SHA256_URI => Ok(Self::Sha256),
            Self::SHA384_URI => Ok(Self::Sha384),
            Self::SHA512_URI => Ok(Self::Sha512),
            other => Err(SamlError::Construction(format!(
                "Unsupported digest algorithm: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::Sha1 => Self::SHA1_URI,
            Self::Sha256 => Self::SHA256_URI,
            Self::Sha384 => Self::SHA384_URI,
            Self::Sha512 => Self::SHA512_URI,
        }
    }

    fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha384 => MessageDigest::sha384(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }

    /// Base64 digest of canonical bytes.
    pub fn digest_base64(self, data: &[u8]) -> SamlResult<String> {
        let digest = openssl::hash::hash(self.message_digest(), data)
            .map_err(|e| SamlError::Crypto(format!("Digest failed: {e}")))?;
        Ok(STANDARD.encode(digest))
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = SamlError;

    fn try_from(value: String) -> SamlResult<Self> {
        Self::from_uri(&value)
    }
}

impl From<DigestAlgorithm> for String {
    fn from(value: DigestAlgorithm) -> Self {
        value.uri().to_string()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// Signature algorithm (RSA PKCS#1 v1.5 family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SignatureAlgorithm {
    RsaSha1,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub const RSA_SHA1_URI: &'static str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
    pub const RSA_SHA256_URI: &'static str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const RSA_SHA384_URI: &'static str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
    pub const RSA_SHA512_URI: &'static str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

    /// Look up an algorithm by its XML-DSig identifier.
    pub fn from_uri(uri: &str) -> SamlResult<Self> {
        match uri {
            Self::RSA_SHA1_URI => Ok(Self::RsaSha1),
            Self::RSA_SHA256_URI => Ok(Self::RsaSha256),
            Self::RSA_SHA384_URI => Ok(Self::RsaSha384),
            Self::RSA_SHA512_URI => Ok(Self::RsaSha512),
            other => Err(SamlError::Construction(format!(
                "Unsupported signature algorithm: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::RsaSha1 => Self::RSA_SHA1_URI,
            Self::RsaSha256 => Self::RSA_SHA256_URI,
            Self::RsaSha384 => Self::RSA_SHA384_URI,
            Self::RsaSha512 => Self::RSA_SHA512_URI,
        }
    }

    pub(crate) fn message_digest(self) -> MessageDigest {
        match self {
            Self::RsaSha1 => MessageDigest::sha1(),
            Self::RsaSha256 => MessageDigest::sha256(),
            Self::RsaSha384 => MessageDigest::sha384(),
            Self::RsaSha512 => MessageDigest::sha512(),
        }
    }
}

impl TryFrom<String> for SignatureAlgorithm {
    type Error = SamlError;

    fn try_from(value: String) -> SamlResult<Self> {
        Self::from_uri(&value)
    }
}

impl From<SignatureAlgorithm> for String {
    fn from(value: SignatureAlgorithm) -> Self {
        value.uri().to_string()
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// Apply XML Canonicalization (without comments) to a self-contained fragment.
pub fn canonicalize_xml(xml: &str) -> SamlResult<String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SamlError::Malformed(format!("XML canonicalization failed: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| SamlError::Malformed(format!("Canonicalized XML is not valid UTF-8: {e}")))
}

/// A reference to be signed: target ID, transforms, computed digest.
#[derive(Debug, Clone)]
pub struct SignedReference {
    pub uri: String,
    pub transforms: Vec<&'static str>,
    pub digest_algorithm: DigestAlgorithm,
    pub digest_value: String,
}

impl SignedReference {
    /// Digest `element` as it currently appears in `doc`, re-rooted and
    /// canonicalized. The signature that will carry this reference must not
    /// be in the document yet.
    pub fn digest_element(
        doc: &str,
        element: &XmlElement,
        transforms: Vec<&'static str>,
        digest_algorithm: DigestAlgorithm,
    ) -> SamlResult<Self> {
        let id = element.id().ok_or_else(|| {
            SamlError::Construction(format!("Element {} has no ID to reference", element.qname))
        })?;
        let fragment = element.detached_fragment(doc, None)?;
        let canonical = canonicalize_xml(&fragment)?;
        Ok(Self {
            uri: format!("#{id}"),
            transforms,
            digest_algorithm,
            digest_value: digest_algorithm.digest_base64(canonical.as_bytes())?,
        })
    }
}

/// Transform chain written for every reference: enveloped-signature first.
#[must_use]
pub fn reference_transforms() -> Vec<&'static str> {
    vec![TRANSFORM_ENVELOPED_SIGNATURE, C14N_EXCL_OMIT_COMMENTS]
}

/// Build a `ds:SignedInfo` element. It declares the `ds` namespace itself so
/// the bytes are identical whether canonicalized in or out of the document.
#[must_use]
pub fn build_signed_info(algorithm: SignatureAlgorithm, references: &[SignedReference]) -> String {
    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"");
    signed_info.push_str(DSIG_NS);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:CanonicalizationMethod Algorithm=\"");
    signed_info.push_str(C14N_EXCL_OMIT_COMMENTS);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:SignatureMethod Algorithm=\"");
    signed_info.push_str(algorithm.uri());
    signed_info.push_str("\"/>");
    for reference in references {
        signed_info.push_str("<ds:Reference URI=\"");
        signed_info.push_str(&xml_escape(&reference.uri));
        signed_info.push_str("\"><ds:Transforms>");
        for transform in &reference.transforms {
            signed_info.push_str("<ds:Transform Algorithm=\"");
            signed_info.push_str(transform);
            signed_info.push_str("\"/>");
        }
        signed_info.push_str("</ds:Transforms><ds:DigestMethod Algorithm=\"");
        signed_info.push_str(reference.digest_algorithm.uri());
        signed_info.push_str("\"/><ds:DigestValue>");
        signed_info.push_str(&reference.digest_value);
        signed_info.push_str("</ds:DigestValue></ds:Reference>");
    }
    signed_info.push_str("</ds:SignedInfo>");
    signed_info
}

/// Assemble the `ds:Signature` element from its parts.
#[must_use]
pub fn build_signature_element(
    signed_info: &str,
    signature_value: &[u8],
    key_info: &str,
) -> String {
    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"");
    signature_xml.push_str(DSIG_NS);
    signature_xml.push_str("\">");
    signature_xml.push_str(signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&STANDARD.encode(signature_value));
    signature_xml.push_str("</ds:SignatureValue>");
    signature_xml.push_str(key_info);
    signature_xml.push_str("</ds:Signature>");
    signature_xml
}

/// A reference as found in a received `SignedInfo`.
#[derive(Debug, Clone)]
pub struct ParsedReference {
    pub uri: String,
    pub transforms: Vec<String>,
    pub digest_method: String,
    pub digest_value: String,
}

impl ParsedReference {
    /// The ID the reference points at (`#id` form only).
    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        self.uri.strip_prefix('#').filter(|id| !id.is_empty())
    }

    #[must_use]
    pub fn starts_with_enveloped_transform(&self) -> bool {
        self.transforms.first().map(String::as_str) == Some(TRANSFORM_ENVELOPED_SIGNATURE)
    }
}

/// The parts of a received `ds:Signature` needed for verification.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub canonicalization_method: String,
    pub signature_method: String,
    pub references: Vec<ParsedReference>,
    pub signature_value: Vec<u8>,
    /// Raw `ds:KeyInfo`, decoded during key resolution
    pub key_info: Option<XmlElement>,
}

impl ParsedSignature {
    /// Read a `ds:Signature` element.
    pub fn from_element(signature: &XmlElement) -> SamlResult<Self> {
        let signed_info = signature.child(DSIG_NS, "SignedInfo").ok_or_else(|| {
            SamlError::SignatureInvalid("No SignedInfo element found".to_string())
        })?;

        let canonicalization_method = signed_info
            .child(DSIG_NS, "CanonicalizationMethod")
            .and_then(|e| e.attr("Algorithm"))
            .ok_or_else(|| {
                SamlError::SignatureInvalid("Missing CanonicalizationMethod".to_string())
            })?
            .to_string();

        let signature_method = signed_info
            .child(DSIG_NS, "SignatureMethod")
            .and_then(|e| e.attr("Algorithm"))
            .ok_or_else(|| SamlError::SignatureInvalid("Missing SignatureMethod".to_string()))?
            .to_string();

        let mut references = Vec::new();
        for reference in signed_info.children_named(DSIG_NS, "Reference") {
            let transforms = reference
                .child(DSIG_NS, "Transforms")
                .map(|t| {
                    t.children_named(DSIG_NS, "Transform")
                        .filter_map(|e| e.attr("Algorithm"))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let digest_method = reference
                .child(DSIG_NS, "DigestMethod")
                .and_then(|e| e.attr("Algorithm"))
                .ok_or_else(|| SamlError::SignatureInvalid("Missing DigestMethod".to_string()))?
                .to_string();
            let digest_value = reference
                .child(DSIG_NS, "DigestValue")
                .map(|e| strip_whitespace(&e.text))
                .ok_or_else(|| SamlError::SignatureInvalid("Missing DigestValue".to_string()))?;
            references.push(ParsedReference {
                uri: reference.attr("URI").unwrap_or_default().to_string(),
                transforms,
                digest_method,
                digest_value,
            });
        }
        if references.is_empty() {
            return Err(SamlError::SignatureInvalid(
                "SignedInfo contains no Reference".to_string(),
            ));
        }

        let signature_value = signature
            .child(DSIG_NS, "SignatureValue")
            .map(|e| strip_whitespace(&e.text))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                SamlError::SignatureInvalid("No SignatureValue element found".to_string())
            })?;
        let signature_value = STANDARD
            .decode(signature_value)
            .map_err(|e| SamlError::SignatureInvalid(format!("Invalid signature encoding: {e}")))?;

        let key_info = signature.child(DSIG_NS, "KeyInfo").cloned();

        Ok(Self {
            canonicalization_method,
            signature_method,
            references,
            signature_value,
            key_info,
        })
    }

    /// References pointing at the element with the given ID.
    pub fn references_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ParsedReference> {
        self.references
            .iter()
            .filter(move |r| r.target_id() == Some(id))
    }

    pub fn check_canonicalization_method(&self) -> SamlResult<()> {
        if ACCEPTED_C14N.contains(&self.canonicalization_method.as_str()) {
            Ok(())
        } else {
            Err(SamlError::SignatureInvalid(format!(
                "Unsupported canonicalization method: {}",
                self.canonicalization_method
            )))
        }
    }
}

/// Whether a transform URI is one the verifier knows how to apply.
#[must_use]
pub fn is_known_transform(uri: &str) -> bool {
    uri == TRANSFORM_ENVELOPED_SIGNATURE || ACCEPTED_C14N.contains(&uri)
}

pub(crate) fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}
