//! XML and XML-DSig plumbing

pub mod credentials;
pub mod dsig;
pub mod xml;

pub use credentials::SigningCredentials;
pub use dsig::{DigestAlgorithm, SignatureAlgorithm};
pub use xml::XmlElement;
