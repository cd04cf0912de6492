//! Resolve key references to trusted public keys

use crate::config::VerifyOptions;
use crate::error::{SamlError, SamlResult};
use crate::keystore::TrustStore;
use crate::models::{KeyReference, TrustLevel};
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;

/// A key a signature can be checked against.
#[derive(Clone)]
pub struct ResolvedKey {
    pub public_key: PKey<Public>,
    pub certificate: Option<X509>,
    pub trust_level: TrustLevel,
}

impl ResolvedKey {
    pub fn from_certificate(certificate: X509) -> SamlResult<Self> {
        Ok(Self {
            public_key: certificate.public_key()?,
            certificate: Some(certificate),
            trust_level: TrustLevel::TrustedCertificate,
        })
    }
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field(
                "certificate",
                &self.certificate.as_ref().map(|c| c.subject_name()),
            )
            .field("trust_level", &self.trust_level)
            .finish()
    }
}

/// Which references the resolver accepts.
#[derive(Debug, Clone, Copy)]
pub struct ResolverPolicy {
    pub require_trusted_certificate: bool,
    pub allow_key_value: bool,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            require_trusted_certificate: true,
            allow_key_value: false,
        }
    }
}

impl From<&VerifyOptions> for ResolverPolicy {
    fn from(options: &VerifyOptions) -> Self {
        Self {
            require_trusted_certificate: options.require_trusted_certificate,
            allow_key_value: options.allow_key_value,
        }
    }
}

pub struct KeyResolver;

impl KeyResolver {
    /// Resolve `reference` against `trust_store`. Exactly one match is
    /// required; none or several is a resolution failure.
    pub fn resolve(
        reference: &KeyReference,
        trust_store: &dyn TrustStore,
        policy: ResolverPolicy,
    ) -> SamlResult<ResolvedKey> {
        match reference {
            KeyReference::DirectCertificate(der) => {
                let certificate = X509::from_der(der).map_err(|e| {
                    SamlError::KeyResolutionFailed(format!("Invalid embedded certificate: {e}"))
                })?;
                let trusted = trust_store.is_trusted(&certificate);
                if policy.require_trusted_certificate && !trusted {
                    return Err(SamlError::KeyResolutionFailed(
                        "Embedded certificate is not trusted".to_string(),
                    ));
                }
                let mut key = ResolvedKey::from_certificate(certificate)?;
                if !trusted {
                    key.trust_level = TrustLevel::UntrustedCertificate;
                }
                Ok(key)
            }
            KeyReference::SubjectKeyIdentifier(ski) => {
                let candidates = trust_store.certificates_by_ski(ski);
                single_match(candidates, "SubjectKeyIdentifier")
            }
            KeyReference::IssuerSerial {
                issuer_name,
                serial_number,
            } => {
                let candidates =
                    trust_store.certificates_by_issuer_serial(issuer_name, serial_number);
                single_match(candidates, "IssuerSerial")
            }
            KeyReference::KeyValue { .. } => {
                if !policy.allow_key_value {
                    return Err(SamlError::KeyResolutionFailed(
                        "Raw KeyValue references are not accepted".to_string(),
                    ));
                }
                Ok(ResolvedKey {
                    public_key: reference.to_public_key()?,
                    certificate: None,
                    trust_level: TrustLevel::RawKey,
                })
            }
        }
    }
}

fn single_match(mut candidates: Vec<X509>, kind: &str) -> SamlResult<ResolvedKey> {
    if candidates.len() > 1 {
        return Err(SamlError::KeyResolutionFailed(format!(
            "{} trusted certificates match the {kind} reference",
            candidates.len()
        )));
    }
    let certificate = candidates.pop().ok_or_else(|| {
        SamlError::KeyResolutionFailed(format!(
            "No trusted certificate matches the {kind} reference"
        ))
    })?;
    ResolvedKey::from_certificate(certificate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::InMemoryKeyStore;
    use crate::models::KeyReferenceKind;
    use crate::test_support::credentials;

    fn relaxed() -> ResolverPolicy {
        ResolverPolicy {
            require_trusted_certificate: false,
            ..ResolverPolicy::default()
        }
    }

    #[test]
    fn test_trusted_direct_certificate() {
        let creds = credentials("alice");
        let store = InMemoryKeyStore::new().with_trusted_certificate(creds.certificate.clone());
        let reference =
            KeyReference::for_certificate(KeyReferenceKind::DirectCertificate, &creds.certificate)
                .unwrap();

        for policy in [ResolverPolicy::default(), relaxed()] {
            let key = KeyResolver::resolve(&reference, &store, policy).unwrap();
            assert_eq!(key.trust_level, TrustLevel::TrustedCertificate);
        }
    }

    #[test]
    fn test_unknown_direct_certificate_is_not_reported_trusted() {
        let creds = credentials("alice");
        let empty = InMemoryKeyStore::new();
        let reference =
            KeyReference::for_certificate(KeyReferenceKind::DirectCertificate, &creds.certificate)
                .unwrap();

        assert!(matches!(
            KeyResolver::resolve(&reference, &empty, ResolverPolicy::default()),
            Err(SamlError::KeyResolutionFailed(_))
        ));

        let key = KeyResolver::resolve(&reference, &empty, relaxed()).unwrap();
        assert_eq!(key.trust_level, TrustLevel::UntrustedCertificate);
        assert!(key.trust_level < TrustLevel::TrustedCertificate);
        assert!(key.trust_level > TrustLevel::RawKey);
    }

    #[test]
    fn test_issuer_serial_resolves_equivalent_name() {
        let creds = credentials("alice");
        let store = InMemoryKeyStore::new().with_trusted_certificate(creds.certificate.clone());
        let reference = KeyReference::IssuerSerial {
            issuer_name: " cn = ALICE ".to_string(),
            serial_number: "1".to_string(),
        };
        let key = KeyResolver::resolve(&reference, &store, ResolverPolicy::default()).unwrap();
        assert_eq!(key.trust_level, TrustLevel::TrustedCertificate);
    }
}
