//! Assertion issuance with optional self-signing

use crate::config::SigningConfig;
use crate::error::{SamlError, SamlResult};
use crate::keystore::KeySource;
use crate::models::{Assertion, Conditions, IssuedAssertion, KeyReference, Statement, Subject};
use crate::saml::dsig::{reference_transforms, SignedReference};
use crate::saml::xml::XmlElement;
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Builds assertions, optionally signing them with an internal signature.
pub struct AssertionIssuer {
    issuer_name: String,
    key_source: Arc<dyn KeySource>,
}

impl AssertionIssuer {
    /// Create a new assertion issuer
    pub fn new(issuer_name: impl Into<String>, key_source: Arc<dyn KeySource>) -> Self {
        Self {
            issuer_name: issuer_name.into(),
            key_source,
        }
    }

    /// Issue an assertion now.
    pub fn issue(
        &self,
        conditions: &Conditions,
        subject: &Subject,
        statements: &[Statement],
        signing: Option<&SigningConfig>,
    ) -> SamlResult<IssuedAssertion> {
        self.issue_at(conditions, subject, statements, signing, Utc::now())
    }

    /// Issue an assertion as of `issued_at`.
    pub fn issue_at(
        &self,
        conditions: &Conditions,
        subject: &Subject,
        statements: &[Statement],
        signing: Option<&SigningConfig>,
        issued_at: DateTime<Utc>,
    ) -> SamlResult<IssuedAssertion> {
        if subject.name_id.value.is_empty() {
            return Err(SamlError::Construction(
                "Subject NameID value must not be empty".to_string(),
            ));
        }
        subject.confirmation.validate()?;

        let issue_instant = issued_at.trunc_subsecs(0);
        let conditions = conditions.resolve(issue_instant)?;

        let issuer = signing
            .and_then(|s| s.issuer_name.clone())
            .unwrap_or_else(|| self.issuer_name.clone());

        let assertion = Assertion {
            id: format!("_assert_{}", Uuid::new_v4()),
            issuer,
            issue_instant,
            subject: subject.clone(),
            conditions,
            statements: statements.to_vec(),
        };

        let (head, tail) = assertion.to_xml_parts();
        let (xml, signed) = match signing {
            Some(config) => {
                let signature = self.self_sign(&head, &tail, config)?;
                let mut xml = String::with_capacity(head.len() + signature.len() + tail.len());
                xml.push_str(&head);
                xml.push_str(&signature);
                xml.push_str(&tail);
                (xml, true)
            }
            None => {
                let mut xml = head;
                xml.push_str(&tail);
                (xml, false)
            }
        };

        tracing::info!(
            assertion_id = %assertion.id,
            issuer = %assertion.issuer,
            signed = signed,
            confirmation = ?assertion.subject.confirmation.method,
            "SAML assertion issued"
        );

        Ok(IssuedAssertion {
            assertion,
            xml,
            signed,
        })
    }

    /// Build the internal signature; it sits right after the Issuer with no
    /// surrounding whitespace so removing it restores the digested bytes.
    fn self_sign(&self, head: &str, tail: &str, config: &SigningConfig) -> SamlResult<String> {
        let credentials = self
            .key_source
            .signing_credentials(&config.signing_key_alias, &config.signing_key_password)?;
        let key_reference =
            KeyReference::for_certificate(config.key_reference, &credentials.certificate)?;

        let mut unsigned = String::with_capacity(head.len() + tail.len());
        unsigned.push_str(head);
        unsigned.push_str(tail);
        let root = XmlElement::parse_document(&unsigned)?;

        let reference = SignedReference::digest_element(
            &unsigned,
            &root,
            reference_transforms(),
            config.digest_algorithm,
        )?;

        tracing::debug!(
            reference = %reference.uri,
            key_reference = ?config.key_reference,
            signature_algorithm = %config.signature_algorithm,
            "Signing SAML assertion"
        );

        credentials.signature_element(config.signature_algorithm, &[reference], &key_reference)
    }
}
