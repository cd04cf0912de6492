//! Signed SAML token support for WS-Security
//!
//! This crate issues SAML 2.0 assertions, binds them into a SOAP
//! `wsse:Security` header with XML-DSig signatures, and verifies them on
//! the receiving side:
//! - Conditions (validity window) and subject models
//! - Key references: embedded certificate, SKI, issuer/serial, raw key value
//! - Internal (self-signed) and enclosing (message) signatures
//! - Holder-of-key proof of possession
//! - Verification against an injected trust store

pub mod config;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod models;
pub mod saml;
pub mod services;

pub use config::{EnclosingSignatureConfig, SigningConfig, VerifyOptions};
pub use envelope::insert_security_header;
pub use error::{SamlError, SamlResult};
pub use keystore::{InMemoryKeyStore, KeySource, TrustStore};
pub use models::{
    Assertion, Conditions, ConfirmationMethod, IssuedAssertion, KeyReference, KeyReferenceKind,
    NameId, Statement, Subject, SubjectConfirmation, TrustLevel, VerifiedAssertion,
};
pub use saml::{DigestAlgorithm, SignatureAlgorithm, SigningCredentials};
pub use services::{AssertionIssuer, KeyResolver, SignatureBinder, VerificationEngine};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::saml::SigningCredentials;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::extension::SubjectKeyIdentifier;
    use openssl::x509::{X509Builder, X509NameBuilder};

    pub const KEY_ALIAS: &str = "wss40";
    pub const KEY_PASSWORD: &str = "security";

    pub const SOAP_MSG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"><soapenv:Body><add xmlns=\"http://ws.apache.org/counter/counter_port_type\"><value>15</value></add></soapenv:Body></soapenv:Envelope>";

    /// Fresh RSA key with a self-signed certificate carrying an SKI.
    pub fn credentials(common_name: &str) -> SigningCredentials {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        SigningCredentials::new(builder.build(), key).unwrap()
    }
}
