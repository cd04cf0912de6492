//! Assertion subject and its confirmation method

use crate::error::{SamlError, SamlResult};
use crate::models::{KeyReference, NameId};

pub const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
pub const CM_HOLDER_OF_KEY: &str = "urn:oasis:names:tc:SAML:2.0:cm:holder-of-key";
pub const CM_SENDER_VOUCHES: &str = "urn:oasis:names:tc:SAML:2.0:cm:sender-vouches";

/// How the relying party confirms the presenter is the subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConfirmationMethod {
    #[default]
    Bearer,
    HolderOfKey,
    SenderVouches,
}

impl ConfirmationMethod {
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::Bearer => CM_BEARER,
            Self::HolderOfKey => CM_HOLDER_OF_KEY,
            Self::SenderVouches => CM_SENDER_VOUCHES,
        }
    }

    pub fn from_uri(uri: &str) -> SamlResult<Self> {
        match uri {
            CM_BEARER => Ok(Self::Bearer),
            CM_HOLDER_OF_KEY => Ok(Self::HolderOfKey),
            CM_SENDER_VOUCHES => Ok(Self::SenderVouches),
            other => Err(SamlError::Malformed(format!(
                "Unknown subject confirmation method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubjectConfirmation {
    pub method: ConfirmationMethod,
    /// Key the presenter must prove possession of (holder-of-key only)
    pub key: Option<KeyReference>,
}

impl SubjectConfirmation {
    #[must_use]
    pub fn bearer() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sender_vouches() -> Self {
        Self {
            method: ConfirmationMethod::SenderVouches,
            key: None,
        }
    }

    #[must_use]
    pub fn holder_of_key(key: KeyReference) -> Self {
        Self {
            method: ConfirmationMethod::HolderOfKey,
            key: Some(key),
        }
    }

    pub(crate) fn validate(&self) -> SamlResult<()> {
        if self.method == ConfirmationMethod::HolderOfKey && self.key.is_none() {
            return Err(SamlError::Construction(
                "Holder-of-key confirmation requires a key reference".to_string(),
            ));
        }
        Ok(())
    }
}

/// The subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    pub name_id: NameId,
    pub confirmation: SubjectConfirmation,
}

impl Subject {
    pub fn new(name_id: NameId, confirmation: SubjectConfirmation) -> Self {
        Self {
            name_id,
            confirmation,
        }
    }

    /// Bearer subject.
    pub fn bearer(name_id: NameId) -> Self {
        Self::new(name_id, SubjectConfirmation::bearer())
    }

    #[must_use]
    pub fn is_holder_of_key(&self) -> bool {
        self.confirmation.method == ConfirmationMethod::HolderOfKey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_uris() {
        for method in [
            ConfirmationMethod::Bearer,
            ConfirmationMethod::HolderOfKey,
            ConfirmationMethod::SenderVouches,
        ] {
            assert_eq!(ConfirmationMethod::from_uri(method.uri()).unwrap(), method);
        }
        assert!(ConfirmationMethod::from_uri("urn:example:unknown").is_err());
    }

    #[test]
    fn test_holder_of_key_requires_key() {
        let confirmation = SubjectConfirmation {
            method: ConfirmationMethod::HolderOfKey,
            key: None,
        };
        assert!(matches!(
            confirmation.validate(),
            Err(SamlError::Construction(_))
        ));
        assert!(SubjectConfirmation::bearer().validate().is_ok());
    }
}
