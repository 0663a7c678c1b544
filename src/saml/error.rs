use super::validator::ValidationStage;

/// Errors raised by the SAML engine.
///
/// Every variant is terminal for the login attempt it belongs to. Detailed
/// messages are meant for server-side logs; the HTTP layer replaces them with
/// a generic body.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    #[error("Invalid IdP metadata: {0}")]
    MetadataFormat(String),

    #[error("IdP metadata unavailable from {location}: {reason}")]
    MetadataUnavailable { location: String, reason: String },

    #[error("SAMLResponse is missing")]
    MissingResponse,

    #[error("Malformed SAMLResponse: {0}")]
    MalformedResponse(String),

    #[error("SAML assertion has no NameID")]
    MissingSubject,

    #[error("No audience matches SP entity ID '{expected}' (found [{}])", .found.join(", "))]
    WrongAudience {
        expected: String,
        found: Vec<String>,
    },

    #[error("SAML assertion expired: {0}")]
    ExpiredAssertion(String),

    #[error("SAML assertion is not signed")]
    MissingSignature,

    #[error("SAML assertion signed by an untrusted certificate")]
    UntrustedSigner,

    #[error("Invalid SAML signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid relay state: {0}")]
    RelayState(String),

    #[error("Failed to encode SAML message: {0}")]
    Encoding(String),
}

impl SamlError {
    /// Machine-readable error kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            SamlError::MetadataFormat(_) => "metadata_format",
            SamlError::MetadataUnavailable { .. } => "metadata_unavailable",
            SamlError::MissingResponse => "missing_response",
            SamlError::MalformedResponse(_) => "malformed_response",
            SamlError::MissingSubject => "missing_subject",
            SamlError::WrongAudience { .. } => "wrong_audience",
            SamlError::ExpiredAssertion(_) => "expired_assertion",
            SamlError::MissingSignature => "missing_signature",
            SamlError::UntrustedSigner => "untrusted_signer",
            SamlError::InvalidSignature(_) => "invalid_signature",
            SamlError::RelayState(_) => "relay_state",
            SamlError::Encoding(_) => "encoding",
        }
    }

    /// Whether the error comes from obtaining IdP metadata rather than from
    /// the inbound message.
    pub fn is_metadata_error(&self) -> bool {
        matches!(
            self,
            SamlError::MetadataFormat(_) | SamlError::MetadataUnavailable { .. }
        )
    }

    /// The response-validation stage that rejected the message, if any.
    pub fn failed_stage(&self) -> Option<ValidationStage> {
        match self {
            SamlError::MissingResponse | SamlError::MalformedResponse(_) => {
                Some(ValidationStage::Received)
            }
            SamlError::MissingSubject => Some(ValidationStage::Decoded),
            SamlError::WrongAudience { .. } => Some(ValidationStage::Parsed),
            SamlError::ExpiredAssertion(_) => Some(ValidationStage::AudienceChecked),
            SamlError::MissingSignature
            | SamlError::UntrustedSigner
            | SamlError::InvalidSignature(_) => Some(ValidationStage::TemporallyValid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_audience_message_lists_found_audiences() {
        let err = SamlError::WrongAudience {
            expected: "my-sp".to_string(),
            found: vec!["other-sp".to_string(), "third-sp".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No audience matches SP entity ID 'my-sp' (found [other-sp, third-sp])"
        );
        assert_eq!(err.kind(), "wrong_audience");
    }

    #[test]
    fn test_metadata_errors_are_classified() {
        assert!(SamlError::MetadataFormat("x".into()).is_metadata_error());
        assert!(
            SamlError::MetadataUnavailable {
                location: "https://idp.example/metadata".into(),
                reason: "HTTP 500".into(),
            }
            .is_metadata_error()
        );
        assert!(!SamlError::UntrustedSigner.is_metadata_error());
        assert!(!SamlError::RelayState("expired".into()).is_metadata_error());
    }

    #[test]
    fn test_failed_stage_matches_pipeline_order() {
        assert_eq!(
            SamlError::MissingResponse.failed_stage(),
            Some(ValidationStage::Received)
        );
        assert_eq!(
            SamlError::ExpiredAssertion("past".into()).failed_stage(),
            Some(ValidationStage::AudienceChecked)
        );
        assert_eq!(
            SamlError::UntrustedSigner.failed_stage(),
            Some(ValidationStage::TemporallyValid)
        );
        assert_eq!(SamlError::RelayState("bad".into()).failed_stage(), None);
    }
}
