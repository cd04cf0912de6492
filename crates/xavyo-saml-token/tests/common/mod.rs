//! Integration test helpers for xavyo-saml-token.
//!
//! Generates RSA keys and self-signed certificates at test time, holds the
//! sample SOAP message and wires an issuer, binder and key store together.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::SubjectKeyIdentifier;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::sync::{Arc, Once};
use xavyo_saml_token::{
    insert_security_header, AssertionIssuer, Conditions, EnclosingSignatureConfig,
    InMemoryKeyStore, IssuedAssertion, KeyReferenceKind, NameId, SignatureBinder, SigningConfig,
    SigningCredentials, Subject,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const ISSUER_ALIAS: &str = "wss40";
pub const CLIENT_ALIAS: &str = "wss86";
pub const OTHER_ALIAS: &str = "other";
pub const KEY_PASSWORD: &str = "security";
pub const ISSUER_NAME: &str = "www.example.com";

pub const SAMPLE_SOAP_MSG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
<soapenv:Body>\
<add xmlns=\"http://ws.apache.org/counter/counter_port_type\">\
<value>15</value>\
</add>\
</soapenv:Body>\
</soapenv:Envelope>";

// ============================================================================
// Key material
// ============================================================================

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

/// Self-signed certificate for `key` with a SubjectKeyIdentifier extension.
pub fn self_signed_certificate(key: &PKey<Private>, common_name: &str, serial: u32) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("O", "Apache").unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
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
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn generate_credentials(common_name: &str, serial: u32) -> SigningCredentials {
    let key = rsa_key();
    let cert = self_signed_certificate(&key, common_name, serial);
    SigningCredentials::new(cert, key).unwrap()
}

// ============================================================================
// Test context
// ============================================================================

/// Issuer, binder and a key store holding the issuer, client and an
/// unrelated key.
pub struct TokenTestContext {
    pub store: Arc<InMemoryKeyStore>,
    pub issuer: AssertionIssuer,
    pub binder: SignatureBinder,
    pub issuer_credentials: SigningCredentials,
    pub client_credentials: SigningCredentials,
    pub other_credentials: SigningCredentials,
}

impl TokenTestContext {
    pub fn new() -> Self {
        init_test_logging();

        let issuer_credentials = generate_credentials("wss40", 1);
        let client_credentials = generate_credentials("wss86", 2);
        let other_credentials = generate_credentials("intruder", 3);

        let store = Arc::new(
            InMemoryKeyStore::new()
                .with_key(ISSUER_ALIAS, KEY_PASSWORD, issuer_credentials.clone())
                .with_key(CLIENT_ALIAS, KEY_PASSWORD, client_credentials.clone())
                .with_key(OTHER_ALIAS, KEY_PASSWORD, other_credentials.clone()),
        );

        Self {
            issuer: AssertionIssuer::new(ISSUER_NAME, store.clone()),
            binder: SignatureBinder::new(store.clone()),
            store,
            issuer_credentials,
            client_credentials,
            other_credentials,
        }
    }

    pub fn envelope(&self) -> String {
        insert_security_header(SAMPLE_SOAP_MSG).unwrap()
    }

    pub fn issuer_signing(&self, kind: KeyReferenceKind) -> SigningConfig {
        SigningConfig::new(ISSUER_ALIAS, KEY_PASSWORD).with_key_reference(kind)
    }

    /// Bearer assertion valid for an hour, self-signed when `kind` is given.
    pub fn issue_bearer(&self, kind: Option<KeyReferenceKind>) -> IssuedAssertion {
        let subject = Subject::bearer(
            NameId::unspecified("uid=joe,ou=people,ou=saml-demo,o=example.com")
                .with_qualifier(ISSUER_NAME),
        );
        let signing = kind.map(|k| self.issuer_signing(k));
        self.issuer
            .issue(
                &Conditions::from_token_period(60).unwrap(),
                &subject,
                &[],
                signing.as_ref(),
            )
            .unwrap()
    }

    /// Bind into a fresh envelope.
    pub fn bind(
        &self,
        issued: &IssuedAssertion,
        enclosing: Option<&EnclosingSignatureConfig>,
    ) -> String {
        self.binder
            .bind(&self.envelope(), issued, enclosing)
            .unwrap()
    }
}
