//! Signing credentials handed out by a key source

use crate::error::{SamlError, SamlResult};
use crate::models::KeyReference;
use crate::saml::dsig::{
    build_signature_element, build_signed_info, canonicalize_xml, SignatureAlgorithm,
    SignedReference,
};
use openssl::pkey::{PKey, Private, Public};
use openssl::sign::Signer;
use openssl::x509::X509;

/// Certificate and private key used to sign assertions or envelopes.
#[derive(Clone)]
pub struct SigningCredentials {
    pub certificate: X509,
    private_key: PKey<Private>,
}

impl SigningCredentials {
    /// Pair a certificate with its private key; the two must match.
    pub fn new(certificate: X509, private_key: PKey<Private>) -> SamlResult<Self> {
        let cert_key = certificate.public_key()?;
        if !cert_key.public_eq(&private_key) {
            return Err(SamlError::KeyStore(
                "Private key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Load from PEM-encoded certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> SamlResult<Self> {
        let certificate = X509::from_pem(cert_pem.as_bytes())
            .map_err(|e| SamlError::KeyStore(format!("Invalid certificate PEM: {e}")))?;
        let private_key = PKey::private_key_from_pem(key_pem.as_bytes())
            .map_err(|e| SamlError::KeyStore(format!("Invalid private key PEM: {e}")))?;
        Self::new(certificate, private_key)
    }

    pub fn public_key(&self) -> SamlResult<PKey<Public>> {
        Ok(self.certificate.public_key()?)
    }

    /// Sign canonical bytes.
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> SamlResult<Vec<u8>> {
        let mut signer = Signer::new(algorithm.message_digest(), &self.private_key)
            .map_err(|e| SamlError::Crypto(format!("Failed to create signer: {e}")))?;
        signer
            .update(data)
            .map_err(|e| SamlError::Crypto(format!("Failed to update signer: {e}")))?;
        signer
            .sign_to_vec()
            .map_err(|e| SamlError::Crypto(format!("Failed to sign: {e}")))
    }

    /// Produce a complete `ds:Signature` over already digested references.
    pub fn signature_element(
        &self,
        algorithm: SignatureAlgorithm,
        references: &[SignedReference],
        key_reference: &KeyReference,
    ) -> SamlResult<String> {
        let signed_info = build_signed_info(algorithm, references);
        // SignedInfo is canonicalized before signing
        let canonical = canonicalize_xml(&signed_info)?;
        let signature_value = self.sign(algorithm, canonical.as_bytes())?;
        Ok(build_signature_element(
            &signed_info,
            &signature_value,
            &key_reference.to_key_info_xml(),
        ))
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &self.certificate.subject_name())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::credentials;

    #[test]
    fn test_from_pem_round_trip() {
        let creds = credentials("pem");
        let cert_pem = String::from_utf8(creds.certificate.to_pem().unwrap()).unwrap();
        let key_pem =
            String::from_utf8(creds.private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let loaded = SigningCredentials::from_pem(&cert_pem, &key_pem).unwrap();
        assert_eq!(
            loaded.certificate.to_der().unwrap(),
            creds.certificate.to_der().unwrap()
        );
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let alice = credentials("alice");
        let bob = credentials("bob");
        let err = SigningCredentials::new(alice.certificate, bob.private_key).unwrap_err();
        assert!(matches!(err, SamlError::KeyStore(_)));
    }

    #[test]
    fn test_invalid_pem_rejected() {
        assert!(matches!(
            SigningCredentials::from_pem("nope", "nope"),
            Err(SamlError::KeyStore(_))
        ));
    }

    #[test]
    fn test_signature_verifies_with_public_key() {
        let creds = credentials("signer");
        let sig = creds
            .sign(SignatureAlgorithm::RsaSha256, b"payload")
            .unwrap();
        let key = creds.public_key().unwrap();
        let mut verifier =
            openssl::sign::Verifier::new(openssl::hash::MessageDigest::sha256(), &key).unwrap();
        verifier.update(b"payload").unwrap();
        assert!(verifier.verify(&sig).unwrap());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let debug = format!("{:?}", credentials("dbg"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
