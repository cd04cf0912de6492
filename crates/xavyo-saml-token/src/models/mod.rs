//! SAML token data model

pub mod assertion;
pub mod conditions;
pub mod key_reference;
pub mod name_id;
pub mod statement;
pub mod subject;

pub use assertion::{Assertion, IssuedAssertion, TrustLevel, VerifiedAssertion, SAML_ASSERTION_NS};
pub use conditions::{Conditions, Validity};
pub use key_reference::{KeyReference, KeyReferenceKind};
pub use name_id::*;
pub use statement::*;
pub use subject::{ConfirmationMethod, Subject, SubjectConfirmation};
