//! Embed assertions into a WS-Security header and sign the message

use crate::config::EnclosingSignatureConfig;
use crate::envelope::{ensure_body_id, expand_element, security_header};
use crate::error::{SamlError, SamlResult};
use crate::keystore::KeySource;
use crate::models::{IssuedAssertion, KeyReference};
use crate::saml::dsig::{reference_transforms, SignedReference};
use crate::saml::xml::{splice, XmlElement};
use crate::saml::SigningCredentials;
use crate::services::key_resolver::ResolvedKey;
use std::sync::Arc;

/// Places an issued assertion into an envelope's security header and
/// optionally adds an enclosing signature.
pub struct SignatureBinder {
    key_source: Arc<dyn KeySource>,
}

impl SignatureBinder {
    pub fn new(key_source: Arc<dyn KeySource>) -> Self {
        Self { key_source }
    }

    /// Insert `issued` as the first child of `wsse:Security`. With an
    /// enclosing config, sign the assertion and the requested parts and
    /// append the `ds:Signature` after the assertion.
    pub fn bind(
        &self,
        envelope: &str,
        issued: &IssuedAssertion,
        enclosing: Option<&EnclosingSignatureConfig>,
    ) -> SamlResult<String> {
        let root = XmlElement::parse_document(envelope)?;
        let security = security_header(&root)?;
        let (doc, at) = expand_element(envelope, security)?;
        let doc = splice(&doc, at, &issued.xml);

        let Some(config) = enclosing else {
            tracing::info!(
                assertion_id = %issued.assertion.id,
                enclosing_signature = false,
                "SAML assertion bound to security header"
            );
            return Ok(doc);
        };

        let signing = &config.signing;
        let credentials = self
            .key_source
            .signing_credentials(&signing.signing_key_alias, &signing.signing_key_password)?;
        check_holder_of_key(issued, &credentials)?;

        let mut ids = vec![issued.assertion.id.clone()];
        let doc = if config.sign_body {
            let (doc, body_id) = ensure_body_id(&doc)?;
            ids.push(body_id);
            doc
        } else {
            doc
        };
        ids.extend(config.part_ids.iter().cloned());

        let root = XmlElement::parse_document(&doc)?;
        let mut references = Vec::with_capacity(ids.len());
        for id in &ids {
            let element = unique_element(&root, id)?;
            references.push(SignedReference::digest_element(
                &doc,
                element,
                reference_transforms(),
                signing.digest_algorithm,
            )?);
        }

        let key_reference =
            KeyReference::for_certificate(signing.key_reference, &credentials.certificate)?;
        let signature = credentials.signature_element(
            signing.signature_algorithm,
            &references,
            &key_reference,
        )?;

        let assertion_end = unique_element(&root, &issued.assertion.id)?.span.end;
        let signed = splice(&doc, assertion_end, &signature);

        tracing::info!(
            assertion_id = %issued.assertion.id,
            enclosing_signature = true,
            references = references.len(),
            key_reference = ?signing.key_reference,
            "SAML assertion bound to security header"
        );

        Ok(signed)
    }
}

fn unique_element<'a>(root: &'a XmlElement, id: &str) -> SamlResult<&'a XmlElement> {
    let mut matches = root.find_by_id(id);
    if matches.len() > 1 {
        return Err(SamlError::Construction(format!(
            "ID '{id}' appears {} times in the envelope",
            matches.len()
        )));
    }
    matches
        .pop()
        .ok_or_else(|| SamlError::NotFound(format!("No element with ID '{id}' to sign")))
}

/// A holder-of-key assertion may only be enclosed by a signature from the
/// confirmation key.
fn check_holder_of_key(
    issued: &IssuedAssertion,
    credentials: &SigningCredentials,
) -> SamlResult<()> {
    let Some(key) = &issued.assertion.subject.confirmation.key else {
        return Ok(());
    };
    if !issued.assertion.subject.is_holder_of_key() {
        return Ok(());
    }
    let signer = ResolvedKey::from_certificate(credentials.certificate.clone())?;
    if key.matches(&signer)? {
        Ok(())
    } else {
        Err(SamlError::Construction(
            "Enclosing signing key does not match the holder-of-key confirmation key".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningConfig;
    use crate::envelope::insert_security_header;
    use crate::keystore::InMemoryKeyStore;
    use crate::models::{Conditions, KeyReferenceKind, NameId, Subject, SubjectConfirmation};
    use crate::services::AssertionIssuer;
    use crate::test_support::{credentials, KEY_ALIAS, KEY_PASSWORD, SOAP_MSG};

    fn fixture() -> (AssertionIssuer, SignatureBinder, SigningCredentials) {
        let creds = credentials("binder");
        let store: Arc<InMemoryKeyStore> = Arc::new(
            InMemoryKeyStore::new()
                .with_key(KEY_ALIAS, KEY_PASSWORD, creds.clone())
                .with_key("other", KEY_PASSWORD, credentials("other")),
        );
        (
            AssertionIssuer::new("www.example.com", store.clone()),
            SignatureBinder::new(store),
            creds,
        )
    }

    fn bearer_assertion(issuer: &AssertionIssuer) -> IssuedAssertion {
        issuer
            .issue(
                &Conditions::default(),
                &Subject::bearer(NameId::unspecified("alice")),
                &[],
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_bind_unsigned_keeps_rest_of_envelope() {
        let (issuer, binder, _) = fixture();
        let envelope = insert_security_header(SOAP_MSG).unwrap();
        let issued = bearer_assertion(&issuer);
        let out = binder.bind(&envelope, &issued, None).unwrap();

        assert!(out.contains(&issued.xml));
        let body_start = envelope.find("<soapenv:Body").unwrap();
        assert!(out.ends_with(&envelope[body_start..]));
    }

    #[test]
    fn test_bind_without_security_header_is_not_found() {
        let (issuer, binder, _) = fixture();
        let issued = bearer_assertion(&issuer);
        let err = binder.bind(SOAP_MSG, &issued, None).unwrap_err();
        assert!(matches!(err, SamlError::NotFound(_)));
    }

    #[test]
    fn test_enclosing_signature_follows_assertion() {
        let (issuer, binder, _) = fixture();
        let envelope = insert_security_header(SOAP_MSG).unwrap();
        let issued = bearer_assertion(&issuer);
        let config = EnclosingSignatureConfig::new(SigningConfig::new(KEY_ALIAS, KEY_PASSWORD));
        let out = binder.bind(&envelope, &issued, Some(&config)).unwrap();

        assert!(out.contains("</saml:Assertion><ds:Signature"));
        assert!(out.contains("wsu:Id=\"_body_"));
        assert!(out.contains(&format!("URI=\"#{}\"", issued.assertion.id)));
    }

    #[test]
    fn test_unknown_part_is_not_found() {
        let (issuer, binder, _) = fixture();
        let envelope = insert_security_header(SOAP_MSG).unwrap();
        let issued = bearer_assertion(&issuer);
        let config = EnclosingSignatureConfig::new(SigningConfig::new(KEY_ALIAS, KEY_PASSWORD))
            .with_part("missing");
        let err = binder.bind(&envelope, &issued, Some(&config)).unwrap_err();
        assert!(matches!(err, SamlError::NotFound(_)));
    }

    #[test]
    fn test_holder_of_key_requires_matching_enclosing_key() {
        let (issuer, binder, creds) = fixture();
        let envelope = insert_security_header(SOAP_MSG).unwrap();
        let key =
            KeyReference::for_certificate(KeyReferenceKind::DirectCertificate, &creds.certificate)
                .unwrap();
        let subject = Subject::new(
            NameId::unspecified("alice"),
            SubjectConfirmation::holder_of_key(key),
        );
        let issued = issuer
            .issue(&Conditions::default(), &subject, &[], None)
            .unwrap();

        let matching = EnclosingSignatureConfig::new(SigningConfig::new(KEY_ALIAS, KEY_PASSWORD));
        assert!(binder.bind(&envelope, &issued, Some(&matching)).is_ok());

        let other = EnclosingSignatureConfig::new(SigningConfig::new("other", KEY_PASSWORD));
        let err = binder.bind(&envelope, &issued, Some(&other)).unwrap_err();
        assert!(matches!(err, SamlError::Construction(_)));
    }
}
