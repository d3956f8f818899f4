//! Per-login-attempt state.
//!
//! A [`Session`] is created when the login begins, travels through the
//! browser as an opaque string (see [`Session::marshal`]), and is authorized
//! exactly once when the IdP posts back to the ACS.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    SamlError, assertion::Assertion, saml_registry::ServiceProviderRegistry,
    validator::AssertionValidator,
};

/// Form field carrying the base64 encoded Response.
pub const SAML_RESPONSE_PARAM: &str = "SAMLResponse";

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the IdP's response.
    Created,
    Authorized,
    /// Authorization was attempted and failed; the session cannot be reused.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "SPEntityID")]
    sp_entity_id: String,
    #[serde(rename = "SAMLAssertion")]
    assertion: Option<Assertion>,
    #[serde(rename = "AuthURL", default, skip_serializing_if = "Option::is_none")]
    auth_url: Option<String>,
    #[serde(rename = "RequestID", default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(rename = "RelayState", default, skip_serializing_if = "Option::is_none")]
    relay_state: Option<String>,
    #[serde(rename = "Failed", default)]
    failed: bool,
}

impl Session {
    /// Session for an SP-initiated login.
    pub(crate) fn new(
        sp_entity_id: impl Into<String>,
        auth_url: String,
        request_id: String,
        relay_state: Option<String>,
    ) -> Self {
        Self {
            sp_entity_id: sp_entity_id.into(),
            assertion: None,
            auth_url: Some(auth_url),
            request_id: Some(request_id),
            relay_state: relay_state.filter(|state| !state.is_empty()),
            failed: false,
        }
    }

    /// Session for a response the IdP sent without a preceding AuthnRequest.
    pub fn unsolicited(sp_entity_id: impl Into<String>) -> Self {
        Self {
            sp_entity_id: sp_entity_id.into(),
            assertion: None,
            auth_url: None,
            request_id: None,
            relay_state: None,
            failed: false,
        }
    }

    /// Restore a session from [`Session::marshal`] output.
    pub fn unmarshal(data: &str) -> Result<Self, SamlError> {
        serde_json::from_str(data)
            .map_err(|e| SamlError::Session(format!("failed to unmarshal session: {e}")))
    }

    pub fn marshal(&self) -> Result<String, SamlError> {
        serde_json::to_string(self)
            .map_err(|e| SamlError::Session(format!("failed to marshal session: {e}")))
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_entity_id
    }

    pub fn assertion(&self) -> Option<&Assertion> {
        self.assertion.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    pub fn state(&self) -> SessionState {
        if self.failed {
            SessionState::Failed
        } else if self.assertion.is_some() {
            SessionState::Authorized
        } else {
            SessionState::Created
        }
    }

    /// The IdP redirect URL built when the login began.
    pub async fn get_auth_url(&self, registry: &ServiceProviderRegistry) -> Result<String, SamlError> {
        registry.resolve(&self.sp_entity_id).await?;
        self.auth_url
            .clone()
            .ok_or_else(|| SamlError::Session("session has no auth URL".to_string()))
    }

    /// Validate the IdP's response and store the resulting assertion.
    ///
    /// `params` are the ACS callback parameters; `SAMLResponse` is required.
    /// Any failure marks the session failed, and a session that is already
    /// authorized or failed cannot be authorized again.
    pub async fn authorize(
        &mut self,
        registry: &ServiceProviderRegistry,
        validator: &AssertionValidator,
        params: &HashMap<String, String>,
    ) -> Result<(), SamlError> {
        match self.state() {
            SessionState::Created => {}
            SessionState::Authorized => {
                return Err(SamlError::Session(
                    "session is already authorized".to_string(),
                ));
            }
            SessionState::Failed => {
                return Err(SamlError::Session(
                    "session authorization already failed".to_string(),
                ));
            }
        }

        match self.validate(registry, validator, params).await {
            Ok(assertion) => {
                tracing::debug!(
                    sp_entity_id = %self.sp_entity_id,
                    assertion_id = %assertion.id,
                    "SAML session authorized"
                );
                self.assertion = Some(assertion);
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                tracing::warn!(
                    sp_entity_id = %self.sp_entity_id,
                    kind = e.kind(),
                    error = %e,
                    "SAML session authorization failed"
                );
                Err(e)
            }
        }
    }

    async fn validate(
        &self,
        registry: &ServiceProviderRegistry,
        validator: &AssertionValidator,
        params: &HashMap<String, String>,
    ) -> Result<Assertion, SamlError> {
        let config = registry.resolve(&self.sp_entity_id).await?;
        let raw_response = params.get(SAML_RESPONSE_PARAM).ok_or_else(|| {
            SamlError::Decode(format!("missing {SAML_RESPONSE_PARAM} parameter"))
        })?;
        validator.validate(&config, raw_response, self.request_id.as_deref())
    }

    /// Consume the session, yielding its assertion.
    pub(crate) fn into_assertion(self) -> Result<Assertion, SamlError> {
        match self.state() {
            SessionState::Authorized => self.assertion.ok_or(SamlError::NotYetAuthenticated),
            SessionState::Created | SessionState::Failed => Err(SamlError::NotYetAuthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        test_support::{ResponseBuilder, TestIdp, test_now, test_sp_config_for},
        validator::Clock,
    };

    async fn registered() -> (TestIdp, ServiceProviderRegistry, String) {
        let idp = TestIdp::generate("idp");
        let config = test_sp_config_for(&idp);
        let entity_id = config.entity_id().to_string();
        let registry = ServiceProviderRegistry::new();
        registry.register(config).await;
        (idp, registry, entity_id)
    }

    fn validator() -> AssertionValidator {
        AssertionValidator::new().with_clock(Clock::Fixed(test_now()))
    }

    fn params(response: String) -> HashMap<String, String> {
        HashMap::from([(SAML_RESPONSE_PARAM.to_string(), response)])
    }

    #[test]
    fn test_marshal_round_trip() {
        let session = Session::new(
            "https://sp.example.com",
            "https://idp.example.com/sso?SAMLRequest=abc".to_string(),
            "id-123".to_string(),
            Some("state".to_string()),
        );
        let restored = Session::unmarshal(&session.marshal().unwrap()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_marshal_field_names() {
        let session = Session::unsolicited("https://sp.example.com");
        let value: serde_json::Value = serde_json::from_str(&session.marshal().unwrap()).unwrap();
        assert_eq!(value["SPEntityID"], "https://sp.example.com");
        assert!(value["SAMLAssertion"].is_null());
    }

    #[test]
    fn test_unmarshal_garbage() {
        assert!(matches!(
            Session::unmarshal("not json"),
            Err(SamlError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_stores_assertion_and_round_trips() {
        let (idp, registry, entity_id) = registered().await;
        let mut session = Session::new(entity_id, "https://idp".to_string(), "id-1".to_string(), None);
        let response = ResponseBuilder::new()
            .in_response_to(Some("id-1"))
            .build_base64(&idp);

        session
            .authorize(&registry, &validator(), &params(response))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Authorized);
        let restored = Session::unmarshal(&session.marshal().unwrap()).unwrap();
        assert_eq!(restored, session);
        assert_eq!(
            restored.assertion().unwrap().name_id.as_deref(),
            Some("alice@example.com")
        );
    }

    #[tokio::test]
    async fn test_authorize_twice_is_rejected() {
        let (idp, registry, entity_id) = registered().await;
        let mut session = Session::unsolicited(entity_id);
        let response = ResponseBuilder::new().build_base64(&idp);

        session
            .authorize(&registry, &validator(), &params(response.clone()))
            .await
            .unwrap();
        let err = session
            .authorize(&registry, &validator(), &params(response))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Session(_)));
        assert_eq!(session.state(), SessionState::Authorized);
    }

    #[tokio::test]
    async fn test_failed_authorization_is_terminal() {
        let (_, registry, entity_id) = registered().await;
        let attacker = TestIdp::generate("attacker");
        let mut session = Session::unsolicited(entity_id);

        let err = session
            .authorize(
                &registry,
                &validator(),
                &params(ResponseBuilder::new().build_base64(&attacker)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Signature(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(
            session.into_assertion(),
            Err(SamlError::NotYetAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_missing_saml_response_parameter() {
        let (_, registry, entity_id) = registered().await;
        let mut session = Session::unsolicited(entity_id);
        let err = session
            .authorize(&registry, &validator(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unknown_service_provider() {
        let registry = ServiceProviderRegistry::new();
        let mut session = Session::unsolicited("https://gone.example.com");

        assert!(matches!(
            session.get_auth_url(&registry).await,
            Err(SamlError::UnknownServiceProvider(_))
        ));
        let err = session
            .authorize(&registry, &validator(), &params("x".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnknownServiceProvider(_)));
    }

    #[tokio::test]
    async fn test_get_auth_url() {
        let (_, registry, entity_id) = registered().await;
        let session = Session::new(
            entity_id,
            "https://idp.example.com/sso?SAMLRequest=x".to_string(),
            "id-1".to_string(),
            None,
        );
        assert_eq!(
            session.get_auth_url(&registry).await.unwrap(),
            "https://idp.example.com/sso?SAMLRequest=x"
        );
    }

    #[test]
    fn test_into_assertion_before_authorize() {
        let session = Session::unsolicited("https://sp.example.com");
        assert_eq!(session.state(), SessionState::Created);
        assert!(matches!(
            session.into_assertion(),
            Err(SamlError::NotYetAuthenticated)
        ));
    }
}
