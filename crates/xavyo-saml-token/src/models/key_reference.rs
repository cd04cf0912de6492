//! Key reference encodings carried in `ds:KeyInfo`

use crate::error::{SamlError, SamlResult};
use crate::saml::dsig::{strip_whitespace, DSIG_NS};
use crate::saml::xml::{xml_escape, XmlElement};
use crate::services::key_resolver::ResolvedKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::bn::BigNum;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use openssl::x509::{X509NameRef, X509Ref, X509};
use serde::{Deserialize, Serialize};

/// Which encoding to use when referencing a certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyReferenceKind {
    #[default]
    DirectCertificate,
    SubjectKeyIdentifier,
    IssuerSerial,
    KeyValue,
}

/// How a signature (or holder-of-key confirmation) names its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyReference {
    /// DER-encoded certificate embedded in full
    DirectCertificate(Vec<u8>),
    /// Subject key identifier extension value
    SubjectKeyIdentifier(Vec<u8>),
    IssuerSerial {
        issuer_name: String,
        /// Decimal serial number
        serial_number: String,
    },
    /// Raw RSA public key (big-endian modulus and exponent)
    KeyValue { modulus: Vec<u8>, exponent: Vec<u8> },
}

impl KeyReference {
    /// Reference `cert` using the requested encoding.
    pub fn for_certificate(kind: KeyReferenceKind, cert: &X509Ref) -> SamlResult<Self> {
        match kind {
            KeyReferenceKind::DirectCertificate => Ok(Self::DirectCertificate(cert.to_der()?)),
            KeyReferenceKind::SubjectKeyIdentifier => {
                let ski = cert.subject_key_id().ok_or_else(|| {
                    SamlError::Construction(
                        "Certificate has no SubjectKeyIdentifier extension".to_string(),
                    )
                })?;
                Ok(Self::SubjectKeyIdentifier(ski.as_slice().to_vec()))
            }
            KeyReferenceKind::IssuerSerial => {
                let (issuer_name, serial_number) = issuer_serial(cert)?;
                Ok(Self::IssuerSerial {
                    issuer_name,
                    serial_number,
                })
            }
            KeyReferenceKind::KeyValue => Self::key_value(&cert.public_key()?),
        }
    }

    /// Reference a raw RSA public key.
    pub fn key_value(public_key: &PKey<Public>) -> SamlResult<Self> {
        let rsa = public_key.rsa().map_err(|_| {
            SamlError::Construction("KeyValue references support RSA keys only".to_string())
        })?;
        Ok(Self::KeyValue {
            modulus: rsa.n().to_vec(),
            exponent: rsa.e().to_vec(),
        })
    }

    #[must_use]
    pub fn kind(&self) -> KeyReferenceKind {
        match self {
            Self::DirectCertificate(_) => KeyReferenceKind::DirectCertificate,
            Self::SubjectKeyIdentifier(_) => KeyReferenceKind::SubjectKeyIdentifier,
            Self::IssuerSerial { .. } => KeyReferenceKind::IssuerSerial,
            Self::KeyValue { .. } => KeyReferenceKind::KeyValue,
        }
    }

    /// Serialize as a self-contained `ds:KeyInfo` element.
    #[must_use]
    pub fn to_key_info_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<ds:KeyInfo xmlns:ds=\"");
        xml.push_str(DSIG_NS);
        xml.push_str("\">");
        match self {
            Self::DirectCertificate(der) => {
                xml.push_str("<ds:X509Data><ds:X509Certificate>");
                xml.push_str(&STANDARD.encode(der));
                xml.push_str("</ds:X509Certificate></ds:X509Data>");
            }
            Self::SubjectKeyIdentifier(ski) => {
                xml.push_str("<ds:X509Data><ds:X509SKI>");
                xml.push_str(&STANDARD.encode(ski));
                xml.push_str("</ds:X509SKI></ds:X509Data>");
            }
            Self::IssuerSerial {
                issuer_name,
                serial_number,
            } => {
                xml.push_str("<ds:X509Data><ds:X509IssuerSerial><ds:X509IssuerName>");
                xml.push_str(&xml_escape(issuer_name));
                xml.push_str("</ds:X509IssuerName><ds:X509SerialNumber>");
                xml.push_str(&xml_escape(serial_number));
                xml.push_str("</ds:X509SerialNumber></ds:X509IssuerSerial></ds:X509Data>");
            }
            Self::KeyValue { modulus, exponent } => {
                xml.push_str("<ds:KeyValue><ds:RSAKeyValue><ds:Modulus>");
                xml.push_str(&STANDARD.encode(modulus));
                xml.push_str("</ds:Modulus><ds:Exponent>");
                xml.push_str(&STANDARD.encode(exponent));
                xml.push_str("</ds:Exponent></ds:RSAKeyValue></ds:KeyValue>");
            }
        }
        xml.push_str("</ds:KeyInfo>");
        xml
    }

    /// Decode a received `ds:KeyInfo` element.
    pub fn from_key_info(key_info: &XmlElement) -> SamlResult<Self> {
        if let Some(rsa) = key_info
            .child(DSIG_NS, "KeyValue")
            .and_then(|kv| kv.child(DSIG_NS, "RSAKeyValue"))
        {
            let modulus = decode_child(rsa, "Modulus")?;
            let exponent = decode_child(rsa, "Exponent")?;
            return Ok(Self::KeyValue { modulus, exponent });
        }

        let x509_data = key_info.child(DSIG_NS, "X509Data").ok_or_else(|| {
            SamlError::KeyResolutionFailed("KeyInfo carries no supported key reference".to_string())
        })?;

        if x509_data.child(DSIG_NS, "X509Certificate").is_some() {
            return Ok(Self::DirectCertificate(decode_child(
                x509_data,
                "X509Certificate",
            )?));
        }
        if x509_data.child(DSIG_NS, "X509SKI").is_some() {
            return Ok(Self::SubjectKeyIdentifier(decode_child(
                x509_data, "X509SKI",
            )?));
        }
        if let Some(issuer_serial) = x509_data.child(DSIG_NS, "X509IssuerSerial") {
            let issuer_name = issuer_serial
                .child(DSIG_NS, "X509IssuerName")
                .map(|e| e.text.trim().to_string())
                .ok_or_else(|| {
                    SamlError::KeyResolutionFailed("X509IssuerSerial without issuer".to_string())
                })?;
            let serial_number = issuer_serial
                .child(DSIG_NS, "X509SerialNumber")
                .map(|e| e.text.trim().to_string())
                .ok_or_else(|| {
                    SamlError::KeyResolutionFailed("X509IssuerSerial without serial".to_string())
                })?;
            return Ok(Self::IssuerSerial {
                issuer_name,
                serial_number,
            });
        }

        Err(SamlError::KeyResolutionFailed(
            "X509Data carries no supported key reference".to_string(),
        ))
    }

    /// Whether this reference names the given resolved key.
    pub fn matches(&self, key: &ResolvedKey) -> SamlResult<bool> {
        match self {
            Self::DirectCertificate(der) => {
                let cert = X509::from_der(der).map_err(|e| {
                    SamlError::KeyResolutionFailed(format!("Invalid embedded certificate: {e}"))
                })?;
                Ok(cert.public_key()?.public_eq(&key.public_key))
            }
            Self::SubjectKeyIdentifier(ski) => Ok(key
                .certificate
                .as_ref()
                .and_then(|c| c.subject_key_id().map(|id| id.as_slice() == ski.as_slice()))
                .unwrap_or(false)),
            Self::IssuerSerial {
                issuer_name,
                serial_number,
            } => match key.certificate.as_ref() {
                Some(cert) => {
                    let (issuer, serial) = issuer_serial(cert)?;
                    Ok(same_distinguished_name(&issuer, issuer_name) && &serial == serial_number)
                }
                None => Ok(false),
            },
            Self::KeyValue { .. } => Ok(self.to_public_key()?.public_eq(&key.public_key)),
        }
    }

    /// Rebuild the public key of a `KeyValue` reference.
    pub fn to_public_key(&self) -> SamlResult<PKey<Public>> {
        match self {
            Self::KeyValue { modulus, exponent } => {
                let rsa = Rsa::from_public_components(
                    BigNum::from_slice(modulus)?,
                    BigNum::from_slice(exponent)?,
                )
                .map_err(|e| SamlError::KeyResolutionFailed(format!("Invalid RSA key: {e}")))?;
                Ok(PKey::from_rsa(rsa)?)
            }
            other => Err(SamlError::KeyResolutionFailed(format!(
                "{:?} reference does not carry a raw key",
                other.kind()
            ))),
        }
    }
}

fn decode_child(parent: &XmlElement, local: &str) -> SamlResult<Vec<u8>> {
    let text = parent
        .child(DSIG_NS, local)
        .map(|e| strip_whitespace(&e.text))
        .ok_or_else(|| SamlError::KeyResolutionFailed(format!("Missing {local}")))?;
    STANDARD
        .decode(text)
        .map_err(|e| SamlError::KeyResolutionFailed(format!("Invalid base64 in {local}: {e}")))
}

/// Issuer distinguished name and decimal serial of a certificate.
pub fn issuer_serial(cert: &X509Ref) -> SamlResult<(String, String)> {
    let issuer = distinguished_name(cert.issuer_name())?;
    let serial = cert.serial_number().to_bn()?.to_dec_str()?.to_string();
    Ok((issuer, serial))
}

/// RFC 4514 string form of an X.509 name (`CN=..,O=..`), most specific
/// RDN first.
pub fn distinguished_name(name: &X509NameRef) -> SamlResult<String> {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name()?;
        let value = entry.data().as_utf8()?;
        parts.push(format!("{key}={}", escape_dn_value(&value)));
    }
    parts.reverse();
    Ok(parts.join(","))
}

/// Whether two distinguished names denote the same name. Names are compared
/// as RDN sequences with attribute types upper-cased, values unescaped,
/// whitespace collapsed and case folded. Unparseable names never match.
#[must_use]
pub fn same_distinguished_name(a: &str, b: &str) -> bool {
    match (parse_distinguished_name(a), parse_distinguished_name(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn escape_dn_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

type Rdn = Vec<(String, String)>;

fn parse_distinguished_name(dn: &str) -> Option<Vec<Rdn>> {
    let mut rdns = Vec::new();
    let mut rdn = Vec::new();
    let mut attr_type = String::new();
    // Value bytes, flagged when they came from an escape
    let mut value: Vec<(u8, bool)> = Vec::new();
    let mut in_value = false;
    let mut chars = dn.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_value => {
                let next = chars.next()?;
                if next.is_ascii_hexdigit() {
                    let low = chars.next()?;
                    let byte = u8::from_str_radix(&format!("{next}{low}"), 16).ok()?;
                    value.push((byte, true));
                } else {
                    let mut buf = [0u8; 4];
                    value.extend(next.encode_utf8(&mut buf).bytes().map(|b| (b, true)));
                }
            }
            '=' if !in_value => in_value = true,
            ',' | ';' | '+' if in_value => {
                rdn.push(normalize_attribute(&attr_type, &value)?);
                attr_type.clear();
                value.clear();
                in_value = false;
                if c != '+' {
                    rdn.sort();
                    rdns.push(std::mem::take(&mut rdn));
                }
            }
            _ if in_value => {
                let mut buf = [0u8; 4];
                value.extend(c.encode_utf8(&mut buf).bytes().map(|b| (b, false)));
            }
            _ => attr_type.push(c),
        }
    }

    if in_value {
        rdn.push(normalize_attribute(&attr_type, &value)?);
        rdn.sort();
        rdns.push(rdn);
    } else if !attr_type.trim().is_empty() || !rdn.is_empty() || !rdns.is_empty() {
        return None;
    }
    Some(rdns)
}

fn normalize_attribute(attr_type: &str, value: &[(u8, bool)]) -> Option<(String, String)> {
    let attr_type = attr_type.trim().to_ascii_uppercase();
    if attr_type.is_empty() {
        return None;
    }
    let attr_type = match attr_type.as_str() {
        "E" | "EMAIL" => "EMAILADDRESS".to_string(),
        "S" => "ST".to_string(),
        _ => attr_type,
    };

    let start = value
        .iter()
        .position(|&(b, escaped)| escaped || !b.is_ascii_whitespace())
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&(b, escaped)| escaped || !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    let bytes: Vec<u8> = value[start..end].iter().map(|&(b, _)| b).collect();
    let value = String::from_utf8(bytes).ok()?;
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");

    Some((attr_type, value.to_lowercase()))
}
