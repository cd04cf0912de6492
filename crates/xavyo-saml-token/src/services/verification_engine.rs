//! Verification of assertions received in a WS-Security header
//!
//! Each assertion passes through the same ordered checks and the first
//! failure rejects the whole header:
//!
//! 1. parse the envelope and the assertion
//! 2. discover the internal and enclosing signatures covering it
//! 3. structural check of references and transform chains
//! 4. key resolution against the trust store
//! 5. digest and signature value verification
//! 6. Conditions window (with clock skew)
//! 7. holder-of-key consistency with the enclosing signature

use crate::config::VerifyOptions;
use crate::envelope::security_header;
use crate::error::{SamlError, SamlResult};
use crate::keystore::TrustStore;
use crate::models::{
    Assertion, KeyReference, TrustLevel, Validity, VerifiedAssertion, SAML_ASSERTION_NS,
};
use crate::saml::dsig::{
    canonicalize_xml, is_known_transform, DigestAlgorithm, ParsedReference, ParsedSignature,
    SignatureAlgorithm, DSIG_NS, TRANSFORM_ENVELOPED_SIGNATURE,
};
use crate::saml::xml::XmlElement;
use crate::services::key_resolver::{KeyResolver, ResolvedKey, ResolverPolicy};
use chrono::{DateTime, Utc};
use openssl::memcmp;
use openssl::sign::Verifier;

/// A signature found to cover an assertion.
struct BoundSignature<'a> {
    element: &'a XmlElement,
    parsed: ParsedSignature,
    enclosing: bool,
}

/// Verifies SAML assertions carried in SOAP security headers.
pub struct VerificationEngine;

impl VerificationEngine {
    /// Verify every assertion in the envelope's security header now.
    pub fn verify(
        envelope: &str,
        trust_store: &dyn TrustStore,
        options: &VerifyOptions,
    ) -> SamlResult<Vec<VerifiedAssertion>> {
        Self::verify_at(envelope, trust_store, options, Utc::now())
    }

    /// Verify as of `now`.
    pub fn verify_at(
        envelope: &str,
        trust_store: &dyn TrustStore,
        options: &VerifyOptions,
        now: DateTime<Utc>,
    ) -> SamlResult<Vec<VerifiedAssertion>> {
        let result = verify_envelope(envelope, trust_store, options, now);
        match &result {
            Ok(verified) => {
                tracing::debug!(assertions = verified.len(), "SAML security header verified")
            }
            Err(e) => tracing::warn!(error = %e, "SAML security header rejected"),
        }
        result
    }
}

fn verify_envelope(
    envelope: &str,
    trust_store: &dyn TrustStore,
    options: &VerifyOptions,
    now: DateTime<Utc>,
) -> SamlResult<Vec<VerifiedAssertion>> {
    let root = XmlElement::parse_document(envelope)?;
    let security = security_header(&root)?;

    let assertions: Vec<&XmlElement> = security
        .children_named(SAML_ASSERTION_NS, "Assertion")
        .collect();
    if assertions.is_empty() {
        return Err(SamlError::NotFound(
            "No SAML assertion in security header".to_string(),
        ));
    }

    let mut enclosing = Vec::new();
    for element in security.children_named(DSIG_NS, "Signature") {
        enclosing.push((element, ParsedSignature::from_element(element)?));
    }

    let policy = ResolverPolicy::from(options);
    let mut verified = Vec::with_capacity(assertions.len());
    for element in assertions {
        verified.push(verify_assertion(
            envelope,
            &root,
            element,
            &enclosing,
            trust_store,
            policy,
            options,
            now,
        )?);
    }
    Ok(verified)
}

#[allow(clippy::too_many_arguments)]
fn verify_assertion(
    doc: &str,
    root: &XmlElement,
    element: &XmlElement,
    enclosing: &[(&XmlElement, ParsedSignature)],
    trust_store: &dyn TrustStore,
    policy: ResolverPolicy,
    options: &VerifyOptions,
    now: DateTime<Utc>,
) -> SamlResult<VerifiedAssertion> {
    // Parse
    let assertion = Assertion::from_element(element)?;
    let id = assertion.id.as_str();
    tracing::debug!(assertion_id = %id, "Parsed SAML assertion");

    // Discovery
    let mut signatures = Vec::new();
    let mut internal = element.children_named(DSIG_NS, "Signature");
    if let Some(signature) = internal.next() {
        if internal.next().is_some() {
            return Err(SamlError::SignatureInvalid(format!(
                "Assertion {id} carries more than one signature"
            )));
        }
        signatures.push(BoundSignature {
            element: signature,
            parsed: ParsedSignature::from_element(signature)?,
            enclosing: false,
        });
    }
    for (signature, parsed) in enclosing {
        if parsed.references_to(id).next().is_some() {
            signatures.push(BoundSignature {
                element: signature,
                parsed: parsed.clone(),
                enclosing: true,
            });
        }
    }
    tracing::debug!(
        assertion_id = %id,
        signatures = signatures.len(),
        "Discovered signatures"
    );

    if signatures.is_empty() && options.require_signature {
        return Err(SamlError::NotFound(format!(
            "Assertion {id} is not covered by any signature"
        )));
    }

    // Structure
    for signature in &signatures {
        check_structure(id, signature)?;
    }

    // Key resolution
    let mut keys = Vec::with_capacity(signatures.len());
    for signature in &signatures {
        let key_info = signature.parsed.key_info.as_ref().ok_or_else(|| {
            SamlError::KeyResolutionFailed("Signature carries no KeyInfo".to_string())
        })?;
        let reference = KeyReference::from_key_info(key_info)?;
        let key = KeyResolver::resolve(&reference, trust_store, policy)?;
        tracing::debug!(
            assertion_id = %id,
            key_reference = ?reference.kind(),
            trust_level = ?key.trust_level,
            "Resolved signing key"
        );
        keys.push(key);
    }

    // Cryptographic check
    for (signature, key) in signatures.iter().zip(&keys) {
        verify_signature(doc, root, signature, key)?;
    }

    // Conditions
    let skew = options.clock_skew();
    match assertion.conditions.validity_with_skew(now, skew) {
        Validity::Valid => {}
        Validity::NotYetValid => {
            return Err(SamlError::NotYetValid {
                not_before: assertion.conditions.not_before.unwrap_or(now),
                now,
            });
        }
        Validity::Expired => {
            return Err(SamlError::Expired {
                not_after: assertion.conditions.not_after.unwrap_or(now),
                now,
            });
        }
    }

    // Holder-of-key
    let mut holder_of_key_proven = false;
    if assertion.subject.is_holder_of_key() {
        if let Some(confirmation_key) = &assertion.subject.confirmation.key {
            for (signature, key) in signatures.iter().zip(&keys) {
                if !signature.enclosing {
                    continue;
                }
                if !confirmation_key.matches(key)? {
                    return Err(SamlError::SubjectConfirmationMismatch(format!(
                        "Enclosing signature over {id} was not made with the confirmation key"
                    )));
                }
                holder_of_key_proven = true;
            }
        }
    }

    let trust_level = keys
        .iter()
        .map(|k| k.trust_level)
        .max()
        .unwrap_or(TrustLevel::Unsigned);

    tracing::debug!(
        assertion_id = %id,
        trust_level = ?trust_level,
        holder_of_key_proven = holder_of_key_proven,
        "SAML assertion verified"
    );

    Ok(VerifiedAssertion {
        assertion,
        trust_level,
        signature_count: signatures.len(),
        holder_of_key_proven,
    })
}

fn check_structure(assertion_id: &str, signature: &BoundSignature<'_>) -> SamlResult<()> {
    let covering: Vec<&ParsedReference> = signature.parsed.references_to(assertion_id).collect();
    if covering.is_empty() {
        return Err(SamlError::InvalidTransformChain(format!(
            "Signature inside assertion {assertion_id} does not reference it"
        )));
    }
    for reference in &covering {
        if !reference.starts_with_enveloped_transform() {
            return Err(SamlError::InvalidTransformChain(format!(
                "Reference to {assertion_id} does not start with the enveloped-signature transform"
            )));
        }
    }
    for reference in &signature.parsed.references {
        if let Some(unknown) = reference.transforms.iter().find(|t| !is_known_transform(t)) {
            return Err(SamlError::InvalidTransformChain(format!(
                "Unsupported transform {unknown} on reference {}",
                reference.uri
            )));
        }
    }
    Ok(())
}

fn verify_signature(
    doc: &str,
    root: &XmlElement,
    signature: &BoundSignature<'_>,
    key: &ResolvedKey,
) -> SamlResult<()> {
    let parsed = &signature.parsed;
    parsed.check_canonicalization_method()?;
    let algorithm = SignatureAlgorithm::from_uri(&parsed.signature_method)
        .map_err(|e| SamlError::SignatureInvalid(e.to_string()))?;

    for reference in &parsed.references {
        verify_reference(doc, root, signature.element, reference)?;
    }

    let signed_info = signature
        .element
        .child(DSIG_NS, "SignedInfo")
        .ok_or_else(|| SamlError::SignatureInvalid("No SignedInfo element found".to_string()))?;
    let canonical = canonicalize_xml(&signed_info.detached_fragment(doc, None)?)?;

    let mut verifier = Verifier::new(algorithm.message_digest(), &key.public_key)
        .map_err(|e| SamlError::SignatureInvalid(format!("Failed to create verifier: {e}")))?;
    verifier
        .update(canonical.as_bytes())
        .map_err(|e| SamlError::SignatureInvalid(format!("Failed to update verifier: {e}")))?;
    let valid = verifier
        .verify(&parsed.signature_value)
        .map_err(|e| SamlError::SignatureInvalid(format!("Verification error: {e}")))?;

    if !valid {
        return Err(SamlError::SignatureInvalid(
            "Signature value does not match SignedInfo".to_string(),
        ));
    }
    Ok(())
}

fn verify_reference(
    doc: &str,
    root: &XmlElement,
    signature: &XmlElement,
    reference: &ParsedReference,
) -> SamlResult<()> {
    let target_id = reference.target_id().ok_or_else(|| {
        SamlError::SignatureInvalid(format!(
            "Only same-document ID references are supported, got '{}'",
            reference.uri
        ))
    })?;

    let targets = root.find_by_id(target_id);
    let target = match targets.as_slice() {
        [single] => *single,
        [] => {
            return Err(SamlError::SignatureInvalid(format!(
                "Referenced element '{target_id}' not found"
            )));
        }
        _ => {
            return Err(SamlError::SignatureInvalid(format!(
                "ID '{target_id}' is not unique in the document"
            )));
        }
    };

    let algorithm = DigestAlgorithm::from_uri(&reference.digest_method)
        .map_err(|e| SamlError::SignatureInvalid(e.to_string()))?;

    let enveloped = reference
        .transforms
        .iter()
        .any(|t| t == TRANSFORM_ENVELOPED_SIGNATURE);
    let fragment = target.detached_fragment(doc, enveloped.then_some(signature))?;
    let computed = algorithm.digest_base64(canonicalize_xml(&fragment)?.as_bytes())?;

    let expected = reference.digest_value.as_bytes();
    let computed = computed.as_bytes();
    if expected.len() != computed.len() || !memcmp::eq(expected, computed) {
        return Err(SamlError::SignatureInvalid(format!(
            "Digest mismatch for reference #{target_id}"
        )));
    }
    Ok(())
}
