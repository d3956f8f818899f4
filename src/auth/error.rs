/// Errors raised while configuring a Service Provider or processing a login.
///
/// Messages name the check that failed but never include the raw XML of the
/// response, which may carry personal data.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    /// Invalid SP configuration (bad URL, key/certificate mismatch, missing SSO endpoint)
    #[error("SAML configuration error: {0}")]
    Config(String),

    /// Response could not be base64/UTF-8 decoded, or a required parameter is missing
    #[error("failed to decode SAML response: {0}")]
    Decode(String),

    /// Response is not well-formed XML or not a SAML protocol Response
    #[error("failed to parse SAML response: {0}")]
    Parse(String),

    /// Signature missing, invalid, untrusted or not covering the assertion
    #[error("SAML signature validation failed: {0}")]
    Signature(String),

    /// Assertion outside its validity window
    #[error("SAML assertion expired or not yet valid: {0}")]
    Expired(String),

    /// Audience restriction does not name this SP
    #[error("SAML audience mismatch: {0}")]
    AudienceMismatch(String),

    /// InResponseTo mismatch, unsolicited response not allowed, or assertion replay
    #[error("SAML response replayed or unsolicited: {0}")]
    ReplayOrUnsolicited(String),

    /// Session refers to an SP entity ID that is not registered
    #[error("unknown service provider '{0}'")]
    UnknownServiceProvider(String),

    /// Identity requested before the session was authorized
    #[error("session has not been authorized")]
    NotYetAuthenticated,

    /// IdP returned a non-success status
    #[error("identity provider returned status '{0}'")]
    Status(String),

    /// Structurally valid response that fails a protocol check
    #[error("invalid SAML response: {0}")]
    InvalidResponse(String),

    /// Session could not be (de)serialized or was used out of order
    #[error("session error: {0}")]
    Session(String),
}

impl SamlError {
    /// Stable label for logs and error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            SamlError::Config(_) => "config_error",
            SamlError::Decode(_) => "decode_error",
            SamlError::Parse(_) => "parse_error",
            SamlError::Signature(_) => "signature_error",
            SamlError::Expired(_) => "expired",
            SamlError::AudienceMismatch(_) => "audience_mismatch",
            SamlError::ReplayOrUnsolicited(_) => "replay_or_unsolicited",
            SamlError::UnknownServiceProvider(_) => "unknown_service_provider",
            SamlError::NotYetAuthenticated => "not_yet_authenticated",
            SamlError::Status(_) => "status_error",
            SamlError::InvalidResponse(_) => "invalid_response",
            SamlError::Session(_) => "session_error",
        }
    }

    /// Whether this error came from judging the IdP's response.
    ///
    /// End users only ever see a generic message for these; the specific
    /// reason goes to the logs.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            SamlError::Decode(_)
                | SamlError::Parse(_)
                | SamlError::Signature(_)
                | SamlError::Expired(_)
                | SamlError::AudienceMismatch(_)
                | SamlError::ReplayOrUnsolicited(_)
                | SamlError::Status(_)
                | SamlError::InvalidResponse(_)
        )
    }
}

impl From<crate::xml::XmlError> for SamlError {
    fn from(err: crate::xml::XmlError) -> Self {
        SamlError::Parse(err.to_string())
    }
}

impl From<crate::xml::dsig::DsigError> for SamlError {
    fn from(err: crate::xml::dsig::DsigError) -> Self {
        SamlError::Signature(err.to_string())
    }
}
