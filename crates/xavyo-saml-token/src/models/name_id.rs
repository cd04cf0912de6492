//! Subject identity (`NameID`)

use serde::{Deserialize, Serialize};

/// Unspecified `NameID` format (default)
pub const NAMEID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
/// Email address `NameID` format
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
/// X.509 subject name `NameID` format
pub const NAMEID_FORMAT_X509_SUBJECT: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:X509SubjectName";
/// Persistent `NameID` format
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
/// Transient `NameID` format
pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

/// The named subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "NameIdFields")]
pub struct NameId {
    pub value: String,
    pub format: String,
    pub qualifier: Option<String>,
}

/// Wire shape of a `NameId`; deserialization goes through `NameId::new`.
#[derive(Deserialize)]
struct NameIdFields {
    value: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    qualifier: Option<String>,
}

impl From<NameIdFields> for NameId {
    fn from(fields: NameIdFields) -> Self {
        NameId::new(fields.value, fields.qualifier, fields.format)
    }
}

fn default_format() -> String {
    NAMEID_FORMAT_UNSPECIFIED.to_string()
}

impl NameId {
    /// Create a `NameID`; an absent or empty format falls back to unspecified.
    pub fn new(
        value: impl Into<String>,
        qualifier: Option<String>,
        format: Option<String>,
    ) -> Self {
        let format = format
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(default_format);
        Self {
            value: value.into(),
            format,
            qualifier,
        }
    }

    /// Unqualified `NameID` with the unspecified format.
    pub fn unspecified(value: impl Into<String>) -> Self {
        Self::new(value, None, None)
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_defaults() {
        assert_eq!(
            NameId::new("alice", None, None).format,
            NAMEID_FORMAT_UNSPECIFIED
        );
        assert_eq!(
            NameId::new("alice", None, Some(String::new())).format,
            NAMEID_FORMAT_UNSPECIFIED
        );
        assert_eq!(
            NameId::new(
                "alice@example.com",
                None,
                Some(NAMEID_FORMAT_EMAIL.to_string())
            )
            .format,
            NAMEID_FORMAT_EMAIL
        );
    }

    #[test]
    fn test_equality_is_field_wise() {
        let a = NameId::unspecified("alice").with_qualifier("www.example.com");
        let b = NameId::new(
            "alice",
            Some("www.example.com".to_string()),
            Some(NAMEID_FORMAT_UNSPECIFIED.to_string()),
        );
        assert_eq!(a, b);
        assert_ne!(a, NameId::unspecified("alice"));
        assert_eq!(NameId::unspecified("bob"), NameId::unspecified("bob"));
    }

    #[test]
    fn test_deserialize_without_format() {
        let id: NameId = serde_json::from_str(r#"{"value":"carol"}"#).unwrap();
        assert_eq!(id.format, NAMEID_FORMAT_UNSPECIFIED);
        assert!(id.qualifier.is_none());
    }

    #[test]
    fn test_deserialize_empty_format_defaults() {
        for json in [
            r#"{"value":"dave","format":""}"#,
            r#"{"value":"dave","format":"  "}"#,
            r#"{"value":"dave","format":null}"#,
        ] {
            let id: NameId = serde_json::from_str(json).unwrap();
            assert_eq!(id, NameId::unspecified("dave"), "{json}");
        }

        let id: NameId = serde_json::from_str(&format!(
            r#"{{"value":"dave@example.com","format":"{NAMEID_FORMAT_EMAIL}","qualifier":"idp"}}"#
        ))
        .unwrap();
        assert_eq!(id.format, NAMEID_FORMAT_EMAIL);
        assert_eq!(id.qualifier.as_deref(), Some("idp"));

        let round_trip: NameId =
            serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();
        assert_eq!(round_trip, id);
    }
}
