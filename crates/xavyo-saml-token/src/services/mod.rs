//! Issuance, binding and verification services

pub mod assertion_issuer;
pub mod key_resolver;
pub mod signature_binder;
pub mod verification_engine;

pub use assertion_issuer::AssertionIssuer;
pub use key_resolver::{KeyResolver, ResolvedKey, ResolverPolicy};
pub use signature_binder::SignatureBinder;
pub use verification_engine::VerificationEngine;
