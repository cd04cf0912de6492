//! Key source and trust store capabilities
//!
//! The signing side asks a [`KeySource`] for credentials by alias; the
//! verifying side consults a [`TrustStore`] to map key references to
//! certificates. Both are injected per call, never process-global.

use crate::error::{SamlError, SamlResult};
use crate::models::key_reference::{issuer_serial, same_distinguished_name};
use crate::saml::SigningCredentials;
use openssl::memcmp;
use openssl::x509::X509;
use std::collections::HashMap;

/// Provides signing credentials for the issuer and binder.
pub trait KeySource: Send + Sync {
    /// Look up credentials by alias, unlocking them with `password`.
    fn signing_credentials(&self, alias: &str, password: &str) -> SamlResult<SigningCredentials>;
}

/// Certificates the verifier is willing to trust.
pub trait TrustStore: Send + Sync {
    /// Certificates whose SubjectKeyIdentifier equals `ski`.
    fn certificates_by_ski(&self, ski: &[u8]) -> Vec<X509>;

    /// Certificates with the given issuer DN and decimal serial number.
    /// Names are compared structurally, not as strings.
    fn certificates_by_issuer_serial(&self, issuer_name: &str, serial_number: &str) -> Vec<X509>;

    /// Whether a certificate presented in full is trusted.
    fn is_trusted(&self, certificate: &X509) -> bool;
}

struct KeyEntry {
    password: String,
    credentials: SigningCredentials,
}

/// Keystore held entirely in memory. Implements both capabilities.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: HashMap<String, KeyEntry>,
    trusted: Vec<X509>,
}

impl InMemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register signing credentials under an alias. The certificate is also
    /// added to the trusted set.
    pub fn add_key(
        &mut self,
        alias: impl Into<String>,
        password: impl Into<String>,
        credentials: SigningCredentials,
    ) {
        self.trusted.push(credentials.certificate.clone());
        self.keys.insert(
            alias.into(),
            KeyEntry {
                password: password.into(),
                credentials,
            },
        );
    }

    /// Trust a certificate without holding its private key.
    pub fn add_trusted_certificate(&mut self, certificate: X509) {
        self.trusted.push(certificate);
    }

    #[must_use]
    pub fn with_key(
        mut self,
        alias: impl Into<String>,
        password: impl Into<String>,
        credentials: SigningCredentials,
    ) -> Self {
        self.add_key(alias, password, credentials);
        self
    }

    #[must_use]
    pub fn with_trusted_certificate(mut self, certificate: X509) -> Self {
        self.add_trusted_certificate(certificate);
        self
    }

    #[must_use]
    pub fn trusted_count(&self) -> usize {
        self.trusted.len()
    }
}

impl KeySource for InMemoryKeyStore {
    fn signing_credentials(&self, alias: &str, password: &str) -> SamlResult<SigningCredentials> {
        let entry = self
            .keys
            .get(alias)
            .ok_or_else(|| SamlError::KeyStore(format!("No key with alias '{alias}'")))?;

        let expected = entry.password.as_bytes();
        let given = password.as_bytes();
        if expected.len() != given.len() || !memcmp::eq(expected, given) {
            return Err(SamlError::KeyStore(format!(
                "Wrong password for key '{alias}'"
            )));
        }

        Ok(entry.credentials.clone())
    }
}

impl TrustStore for InMemoryKeyStore {
    fn certificates_by_ski(&self, ski: &[u8]) -> Vec<X509> {
        self.trusted
            .iter()
            .filter(|c| c.subject_key_id().map(|id| id.as_slice()) == Some(ski))
            .cloned()
            .collect()
    }

    fn certificates_by_issuer_serial(&self, issuer_name: &str, serial_number: &str) -> Vec<X509> {
        self.trusted
            .iter()
            .filter(|c| {
                issuer_serial(c)
                    .map(|(issuer, serial)| {
                        serial == serial_number && same_distinguished_name(&issuer, issuer_name)
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn is_trusted(&self, certificate: &X509) -> bool {
        let Ok(der) = certificate.to_der() else {
            return false;
        };
        self.trusted
            .iter()
            .any(|c| c.to_der().map(|d| d == der).unwrap_or(false))
    }
}

impl std::fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut aliases: Vec<&String> = self.keys.keys().collect();
        aliases.sort();
        f.debug_struct("InMemoryKeyStore")
            .field("aliases", &aliases)
            .field("trusted", &self.trusted.len())
            .finish()
    }
}
