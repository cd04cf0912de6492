//! SAML token error types

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for SAML token operations
pub type SamlResult<T> = Result<T, SamlError>;

/// Errors raised while issuing, binding or verifying a SAML token.
///
/// Construction failures (`Construction`, `KeyStore`, `Crypto`) surface to
/// the issuing side. Every other variant is a verification rejection and is
/// never downgraded to an unsigned or valid result.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Invalid input at construction time (bounds, algorithm, missing key)
    #[error("Construction error: {0}")]
    Construction(String),

    /// No security header, assertion or required signature located
    #[error("Not found: {0}")]
    NotFound(String),

    /// The signature transform chain does not protect the assertion as embedded
    #[error("Invalid transform chain: {0}")]
    InvalidTransformChain(String),

    /// The key reference matched zero or several trusted keys
    #[error("Key resolution failed: {0}")]
    KeyResolutionFailed(String),

    /// Digest or signature value mismatch
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Conditions window starts after the evaluation instant
    #[error("Assertion not yet valid: NotBefore {not_before} is after {now}")]
    NotYetValid {
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Conditions window ended before the evaluation instant
    #[error("Assertion expired: NotOnOrAfter {not_after} is before {now}")]
    Expired {
        not_after: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Holder-of-key confirmation key does not match the proving signature
    #[error("Subject confirmation mismatch: {0}")]
    SubjectConfirmationMismatch(String),

    /// Document could not be parsed or lacks mandatory assertion content
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// Key source could not produce signing credentials
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Cryptographic backend failure while signing
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl SamlError {
    /// Whether this error is a rejection produced on the verifying side.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            SamlError::Construction(_) | SamlError::KeyStore(_) | SamlError::Crypto(_)
        )
    }
}

impl From<openssl::error::ErrorStack> for SamlError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SamlError::Crypto(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(SamlError::SignatureInvalid("x".to_string()).is_rejection());
        assert!(SamlError::InvalidTransformChain("x".to_string()).is_rejection());
        assert!(!SamlError::Construction("x".to_string()).is_rejection());
        assert!(!SamlError::KeyStore("x".to_string()).is_rejection());
    }

    #[test]
    fn test_expired_message_contains_bound() {
        let now = Utc::now();
        let err = SamlError::Expired {
            not_after: now,
            now,
        };
        assert!(err.to_string().contains("NotOnOrAfter"));
    }
}
