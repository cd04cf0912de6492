//! Signing and verification configuration

use crate::models::KeyReferenceKind;
use crate::saml::{DigestAlgorithm, SignatureAlgorithm};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Default tolerance applied to both Conditions bounds
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 60;

/// How an assertion or envelope is signed.
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Overrides the issuer name written into the assertion
    #[serde(default)]
    pub issuer_name: Option<String>,
    pub signing_key_alias: String,
    #[serde(default)]
    pub signing_key_password: String,
    #[serde(default)]
    pub key_reference: KeyReferenceKind,
    #[serde(default = "default_digest_algorithm")]
    pub digest_algorithm: DigestAlgorithm,
    #[serde(default = "default_signature_algorithm")]
    pub signature_algorithm: SignatureAlgorithm,
}

fn default_digest_algorithm() -> DigestAlgorithm {
    DigestAlgorithm::Sha256
}

fn default_signature_algorithm() -> SignatureAlgorithm {
    SignatureAlgorithm::RsaSha256
}

impl SigningConfig {
    /// Config for the given key with SHA-256 / RSA-SHA256 and a direct
    /// certificate reference.
    pub fn new(
        signing_key_alias: impl Into<String>,
        signing_key_password: impl Into<String>,
    ) -> Self {
        Self {
            issuer_name: None,
            signing_key_alias: signing_key_alias.into(),
            signing_key_password: signing_key_password.into(),
            key_reference: KeyReferenceKind::DirectCertificate,
            digest_algorithm: default_digest_algorithm(),
            signature_algorithm: default_signature_algorithm(),
        }
    }

    #[must_use]
    pub fn with_issuer_name(mut self, issuer_name: impl Into<String>) -> Self {
        self.issuer_name = Some(issuer_name.into());
        self
    }

    #[must_use]
    pub fn with_key_reference(mut self, kind: KeyReferenceKind) -> Self {
        self.key_reference = kind;
        self
    }

    #[must_use]
    pub fn with_algorithms(
        mut self,
        digest: DigestAlgorithm,
        signature: SignatureAlgorithm,
    ) -> Self {
        self.digest_algorithm = digest;
        self.signature_algorithm = signature;
        self
    }
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("issuer_name", &self.issuer_name)
            .field("signing_key_alias", &self.signing_key_alias)
            .field("signing_key_password", &"[REDACTED]")
            .field("key_reference", &self.key_reference)
            .field("digest_algorithm", &self.digest_algorithm)
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}

/// Signature over the assertion plus parts of the enclosing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclosingSignatureConfig {
    pub signing: SigningConfig,
    /// Also sign the SOAP Body (a `wsu:Id` is added when missing)
    #[serde(default = "default_true")]
    pub sign_body: bool,
    /// IDs of further elements to cover
    #[serde(default)]
    pub part_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl EnclosingSignatureConfig {
    pub fn new(signing: SigningConfig) -> Self {
        Self {
            signing,
            sign_body: true,
            part_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn without_body(mut self) -> Self {
        self.sign_body = false;
        self
    }

    #[must_use]
    pub fn with_part(mut self, id: impl Into<String>) -> Self {
        self.part_ids.push(id.into());
        self
    }
}

/// Verification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    pub clock_skew_seconds: i64,
    /// Reject assertions that no signature covers
    pub require_signature: bool,
    /// Certificates embedded directly must be in the trust store
    pub require_trusted_certificate: bool,
    /// Accept raw `KeyValue` keys without a certificate
    pub allow_key_value: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            require_signature: false,
            require_trusted_certificate: true,
            allow_key_value: false,
        }
    }
}

impl VerifyOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            require_signature: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_clock_skew(mut self, seconds: i64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    /// Clock skew as a duration. Negative values count as zero; values past
    /// the representable range saturate.
    #[must_use]
    pub fn clock_skew(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.clock_skew_seconds.max(0)).unwrap_or(TimeDelta::MAX)
    }

    #[must_use]
    pub fn allowing_key_value(mut self) -> Self {
        self.allow_key_value = true;
        self
    }
}
