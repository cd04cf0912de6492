//! SAML 2.0 assertion model and its XML form

use crate::error::{SamlError, SamlResult};
use crate::models::{
    Attribute, AttributeStatement, AuthnStatement, Conditions, ConfirmationMethod, KeyReference,
    NameId, Statement, Subject, SubjectConfirmation,
};
use crate::saml::dsig::DSIG_NS;
use crate::saml::xml::{format_datetime, parse_datetime, xml_escape, XmlElement};
use chrono::{DateTime, Utc};

pub const SAML_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SAML_VERSION: &str = "2.0";

/// A SAML assertion independent of its signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub id: String,
    pub issuer: String,
    pub issue_instant: DateTime<Utc>,
    pub subject: Subject,
    pub conditions: Conditions,
    pub statements: Vec<Statement>,
}

impl Assertion {
    /// Serialize to a standalone `saml:Assertion` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let (mut head, tail) = self.to_xml_parts();
        head.push_str(&tail);
        head
    }

    /// The XML split right after `</saml:Issuer>`, where an internal
    /// signature belongs.
    pub(crate) fn to_xml_parts(&self) -> (String, String) {
        let issue_instant = format_datetime(self.issue_instant);

        let mut head = String::new();
        head.push_str("<saml:Assertion xmlns:saml=\"");
        head.push_str(SAML_ASSERTION_NS);
        head.push_str("\"\n    ID=\"");
        head.push_str(&xml_escape(&self.id));
        head.push_str("\"\n    Version=\"");
        head.push_str(SAML_VERSION);
        head.push_str("\"\n    IssueInstant=\"");
        head.push_str(&issue_instant);
        head.push_str("\">\n    <saml:Issuer>");
        head.push_str(&xml_escape(&self.issuer));
        head.push_str("</saml:Issuer>");

        let mut tail = String::new();
        tail.push_str("\n    ");
        self.write_subject(&mut tail);
        tail.push_str("\n    ");
        self.write_conditions(&mut tail);
        for statement in &self.statements {
            tail.push_str("\n    ");
            match statement {
                Statement::Authn(authn) => write_authn_statement(authn, &mut tail),
                Statement::Attribute(attrs) => write_attribute_statement(attrs, &mut tail),
            }
        }
        tail.push_str("\n</saml:Assertion>");

        (head, tail)
    }

    fn write_subject(&self, xml: &mut String) {
        let name_id = &self.subject.name_id;
        xml.push_str("<saml:Subject>\n        <saml:NameID Format=\"");
        xml.push_str(&xml_escape(&name_id.format));
        xml.push('"');
        if let Some(qualifier) = &name_id.qualifier {
            xml.push_str(" NameQualifier=\"");
            xml.push_str(&xml_escape(qualifier));
            xml.push('"');
        }
        xml.push('>');
        xml.push_str(&xml_escape(&name_id.value));
        xml.push_str("</saml:NameID>\n        <saml:SubjectConfirmation Method=\"");
        xml.push_str(self.subject.confirmation.method.uri());
        xml.push('"');
        match &self.subject.confirmation.key {
            Some(key) => {
                xml.push_str(">\n            <saml:SubjectConfirmationData xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"saml:KeyInfoConfirmationDataType\">");
                xml.push_str(&key.to_key_info_xml());
                xml.push_str(
                    "</saml:SubjectConfirmationData>\n        </saml:SubjectConfirmation>",
                );
            }
            None => xml.push_str("/>"),
        }
        xml.push_str("\n    </saml:Subject>");
    }

    fn write_conditions(&self, xml: &mut String) {
        xml.push_str("<saml:Conditions");
        if let Some(nb) = self.conditions.not_before {
            xml.push_str(" NotBefore=\"");
            xml.push_str(&format_datetime(nb));
            xml.push('"');
        }
        if let Some(na) = self.conditions.not_after {
            xml.push_str(" NotOnOrAfter=\"");
            xml.push_str(&format_datetime(na));
            xml.push('"');
        }
        xml.push_str("/>");
    }

    /// Parse a standalone assertion document.
    pub fn from_xml(xml: &str) -> SamlResult<Self> {
        let root = XmlElement::parse_document(xml)?;
        Self::from_element(&root)
    }

    /// Read a `saml:Assertion` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        if !element.is(SAML_ASSERTION_NS, "Assertion") {
            return Err(SamlError::Malformed(format!(
                "Expected saml:Assertion, found {}",
                element.qname
            )));
        }

        let id = required_attr(element, "ID")?.to_string();
        let version = required_attr(element, "Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::Malformed(format!(
                "Unsupported assertion version: {version}"
            )));
        }
        let issue_instant = parse_datetime(required_attr(element, "IssueInstant")?)?;

        let issuer = element
            .child(SAML_ASSERTION_NS, "Issuer")
            .map(|e| e.text.clone())
            .ok_or_else(|| SamlError::Malformed("Assertion has no Issuer".to_string()))?;

        let subject = element
            .child(SAML_ASSERTION_NS, "Subject")
            .ok_or_else(|| SamlError::Malformed("Assertion has no Subject".to_string()))
            .and_then(parse_subject)?;

        let conditions = match element.child(SAML_ASSERTION_NS, "Conditions") {
            Some(c) => parse_conditions(c)?,
            None => Conditions::default(),
        };

        let mut statements = Vec::new();
        for child in &element.children {
            if child.is(SAML_ASSERTION_NS, "AuthnStatement") {
                statements.push(Statement::Authn(parse_authn_statement(child)?));
            } else if child.is(SAML_ASSERTION_NS, "AttributeStatement") {
                statements.push(Statement::Attribute(parse_attribute_statement(child)?));
            }
        }

        Ok(Self {
            id,
            issuer,
            issue_instant,
            subject,
            conditions,
            statements,
        })
    }
}

fn write_authn_statement(authn: &AuthnStatement, xml: &mut String) {
    xml.push_str("<saml:AuthnStatement AuthnInstant=\"");
    xml.push_str(&format_datetime(authn.authn_instant));
    xml.push('"');
    if let Some(session_index) = &authn.session_index {
        xml.push_str(" SessionIndex=\"");
        xml.push_str(&xml_escape(session_index));
        xml.push('"');
    }
    xml.push_str(">\n        <saml:AuthnContext>\n            <saml:AuthnContextClassRef>");
    xml.push_str(&xml_escape(&authn.context_class_ref));
    xml.push_str(
        "</saml:AuthnContextClassRef>\n        </saml:AuthnContext>\n    </saml:AuthnStatement>",
    );
}

fn write_attribute_statement(statement: &AttributeStatement, xml: &mut String) {
    xml.push_str("<saml:AttributeStatement>");
    for attr in &statement.attributes {
        xml.push_str("\n        <saml:Attribute Name=\"");
        xml.push_str(&xml_escape(&attr.name));
        xml.push('"');
        if let Some(friendly_name) = &attr.friendly_name {
            xml.push_str(" FriendlyName=\"");
            xml.push_str(&xml_escape(friendly_name));
            xml.push('"');
        }
        if let Some(format) = &attr.name_format {
            xml.push_str(" NameFormat=\"");
            xml.push_str(&xml_escape(format));
            xml.push('"');
        }
        xml.push('>');
        for value in &attr.values {
            xml.push_str("\n            <saml:AttributeValue>");
            xml.push_str(&xml_escape(value));
            xml.push_str("</saml:AttributeValue>");
        }
        xml.push_str("\n        </saml:Attribute>");
    }
    xml.push_str("\n    </saml:AttributeStatement>");
}

fn required_attr<'a>(element: &'a XmlElement, name: &str) -> SamlResult<&'a str> {
    element.attr(name).ok_or_else(|| {
        SamlError::Malformed(format!("{} is missing attribute {name}", element.qname))
    })
}

fn parse_subject(subject: &XmlElement) -> SamlResult<Subject> {
    let name_id = subject
        .child(SAML_ASSERTION_NS, "NameID")
        .ok_or_else(|| SamlError::Malformed("Subject has no NameID".to_string()))?;
    let name_id = NameId::new(
        name_id.text.clone(),
        name_id.attr("NameQualifier").map(str::to_string),
        name_id.attr("Format").map(str::to_string),
    );

    let confirmation = match subject.child(SAML_ASSERTION_NS, "SubjectConfirmation") {
        Some(sc) => {
            let method = ConfirmationMethod::from_uri(required_attr(sc, "Method")?)?;
            let key = sc
                .child(SAML_ASSERTION_NS, "SubjectConfirmationData")
                .and_then(|data| data.child(DSIG_NS, "KeyInfo"))
                .map(KeyReference::from_key_info)
                .transpose()?;
            let confirmation = SubjectConfirmation { method, key };
            confirmation
                .validate()
                .map_err(|e| SamlError::Malformed(e.to_string()))?;
            confirmation
        }
        None => SubjectConfirmation::bearer(),
    };

    Ok(Subject::new(name_id, confirmation))
}

fn parse_conditions(conditions: &XmlElement) -> SamlResult<Conditions> {
    let not_before = conditions
        .attr("NotBefore")
        .map(parse_datetime)
        .transpose()?;
    let not_after = conditions
        .attr("NotOnOrAfter")
        .map(parse_datetime)
        .transpose()?;
    Conditions::new(not_before, not_after).map_err(|e| SamlError::Malformed(e.to_string()))
}

fn parse_authn_statement(element: &XmlElement) -> SamlResult<AuthnStatement> {
    let authn_instant = parse_datetime(required_attr(element, "AuthnInstant")?)?;
    let context_class_ref = element
        .child(SAML_ASSERTION_NS, "AuthnContext")
        .and_then(|c| c.child(SAML_ASSERTION_NS, "AuthnContextClassRef"))
        .map(|c| c.text.clone())
        .ok_or_else(|| {
            SamlError::Malformed("AuthnStatement has no AuthnContextClassRef".to_string())
        })?;
    Ok(AuthnStatement {
        authn_instant,
        session_index: element.attr("SessionIndex").map(str::to_string),
        context_class_ref,
    })
}

fn parse_attribute_statement(element: &XmlElement) -> SamlResult<AttributeStatement> {
    let mut attributes = Vec::new();
    for attr in element.children_named(SAML_ASSERTION_NS, "Attribute") {
        attributes.push(Attribute {
            name: required_attr(attr, "Name")?.to_string(),
            name_format: attr.attr("NameFormat").map(str::to_string),
            friendly_name: attr.attr("FriendlyName").map(str::to_string),
            values: attr
                .children_named(SAML_ASSERTION_NS, "AttributeValue")
                .map(|v| v.text.clone())
                .collect(),
        });
    }
    Ok(AttributeStatement { attributes })
}

/// An assertion as produced by the issuer.
#[derive(Debug, Clone)]
pub struct IssuedAssertion {
    pub assertion: Assertion,
    /// Serialized `saml:Assertion`, including the internal signature if any
    pub xml: String,
    pub signed: bool,
}

/// How strongly the signing key of a verified assertion is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustLevel {
    /// No signature covers the assertion
    Unsigned,
    /// Signed with a raw key value accepted by policy
    RawKey,
    /// Signed with an embedded certificate the trust store does not know
    UntrustedCertificate,
    /// Signed with a key backed by a trusted certificate
    TrustedCertificate,
}

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub assertion: Assertion,
    pub trust_level: TrustLevel,
    /// Signatures (internal and enclosing) that cover the assertion
    pub signature_count: usize,
    /// An enclosing signature was made with the holder-of-key confirmation key
    pub holder_of_key_proven: bool,
}

impl VerifiedAssertion {
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.trust_level != TrustLevel::Unsigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AUTHN_CONTEXT_PASSWORD, NAMEID_FORMAT_EMAIL};
    use chrono::{Duration, TimeZone};

    fn sample() -> Assertion {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Assertion {
            id: "_assert_1".to_string(),
            issuer: "www.example.com".to_string(),
            issue_instant: t0,
            subject: Subject::bearer(NameId::new(
                "alice & co",
                Some("www.example.com".to_string()),
                Some(NAMEID_FORMAT_EMAIL.to_string()),
            )),
            conditions: Conditions::new(Some(t0), Some(t0 + Duration::minutes(60))).unwrap(),
            statements: vec![
                Statement::Authn(
                    AuthnStatement::new(t0, AUTHN_CONTEXT_PASSWORD).with_session_index("s1"),
                ),
                Statement::Attribute(AttributeStatement {
                    attributes: vec![Attribute::new(
                        "role",
                        vec!["admin".to_string(), "user".to_string()],
                    )
                    .with_friendly_name("Role")],
                }),
            ],
        }
    }

    #[test]
    fn test_xml_round_trip() {
        let assertion = sample();
        let xml = assertion.to_xml();
        assert!(xml.contains("NotOnOrAfter=\"2026-03-01T13:00:00Z\""));
        assert!(xml.contains("alice &amp; co"));
        assert_eq!(Assertion::from_xml(&xml).unwrap(), assertion);
    }

    #[test]
    fn test_head_ends_at_issuer() {
        let (head, tail) = sample().to_xml_parts();
        assert!(head.ends_with("</saml:Issuer>"));
        assert!(tail.trim_start().starts_with("<saml:Subject>"));
    }

    #[test]
    fn test_unbounded_conditions_round_trip() {
        let mut assertion = sample();
        assertion.conditions = Conditions::default();
        let xml = assertion.to_xml();
        assert!(xml.contains("<saml:Conditions/>"));
        assert_eq!(
            Assertion::from_xml(&xml).unwrap().conditions,
            Conditions::default()
        );
    }

    #[test]
    fn test_missing_subject_is_malformed() {
        let xml = format!(
            "<saml:Assertion xmlns:saml=\"{SAML_ASSERTION_NS}\" ID=\"a\" Version=\"2.0\" IssueInstant=\"2026-03-01T12:00:00Z\"><saml:Issuer>x</saml:Issuer></saml:Assertion>"
        );
        assert!(matches!(
            Assertion::from_xml(&xml),
            Err(SamlError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_version_is_malformed() {
        let xml = sample()
            .to_xml()
            .replace("Version=\"2.0\"", "Version=\"1.1\"");
        assert!(matches!(
            Assertion::from_xml(&xml),
            Err(SamlError::Malformed(_))
        ));
    }

    #[test]
    fn test_trust_level_ordering() {
        assert!(TrustLevel::TrustedCertificate > TrustLevel::RawKey);
        assert!(TrustLevel::RawKey > TrustLevel::Unsigned);
    }
}
