//! Fuzz target for security header verification.
//!
//! Feeds arbitrary text to the verification engine to ensure malformed
//! envelopes, assertions and signatures are rejected without panicking.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_security_header -- -max_total_time=600

#![no_main]

use libfuzzer_sys::fuzz_target;
use xavyo_saml_token::{InMemoryKeyStore, VerificationEngine, VerifyOptions};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let store = InMemoryKeyStore::new();

        // Default policy: unsigned assertions pass structural checks
        let _ = VerificationEngine::verify(s, &store, &VerifyOptions::default());

        // Strict policy with raw keys accepted exercises the KeyInfo paths
        let options = VerifyOptions::strict().allowing_key_value();
        let _ = VerificationEngine::verify(s, &store, &options);
    }
});
