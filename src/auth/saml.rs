//! SAML 2.0 login provider.
//!
//! [`SamlProvider`] drives SP-initiated (and optionally IdP-initiated) Web
//! Browser SSO:
//! - AuthnRequest generation over the HTTP-Redirect binding
//! - Response validation (signatures, conditions, replay)
//! - Attribute mapping onto an [`IdentityRecord`]
//!
//! The SP trust configuration lives in a [`ServiceProviderRegistry`];
//! sessions only reference it by entity ID.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    SamlError,
    authn_request::AuthRequestBuilder,
    identity::{AttributeMap, AttributeMapper, IdentityRecord},
    provider::{Provider, ProviderSession, Token},
    replay::ReplayCache,
    saml_registry::ServiceProviderRegistry,
    session::Session,
    sp_config::ServiceProviderConfig,
    validator::AssertionValidator,
};

/// Default provider name.
pub const PROVIDER_NAME: &str = "saml";

#[derive(Debug, Clone)]
pub struct SamlProvider {
    name: String,
    sp_entity_id: String,
    attribute_map: AttributeMap,
    registry: ServiceProviderRegistry,
    validator: AssertionValidator,
}

impl SamlProvider {
    /// Register `config` and create a provider for it.
    ///
    /// Returns the provider together with the SP metadata document to publish
    /// to the IdP. The validator rejects replayed assertions by default.
    pub async fn new(
        config: ServiceProviderConfig,
        attribute_map: AttributeMap,
        registry: ServiceProviderRegistry,
    ) -> Result<(Self, Bytes), SamlError> {
        let metadata = Bytes::from(config.metadata_xml()?);
        let sp_entity_id = config.entity_id().to_string();

        registry.register(config).await;

        tracing::info!(
            entity_id = %sp_entity_id,
            metadata_len = metadata.len(),
            "SAML provider initialized"
        );

        let provider = Self {
            name: PROVIDER_NAME.to_string(),
            sp_entity_id,
            attribute_map,
            registry,
            validator: AssertionValidator::new().with_replay_cache(Arc::new(ReplayCache::new())),
        };
        Ok((provider, metadata))
    }

    /// Replace the validator (clock, skew, replay cache).
    pub fn with_validator(mut self, validator: AssertionValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_entity_id
    }

    pub fn attribute_map(&self) -> &AttributeMap {
        &self.attribute_map
    }

    pub fn registry(&self) -> &ServiceProviderRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &AssertionValidator {
        &self.validator
    }

    /// Session for an IdP-initiated callback that arrives without one.
    pub fn unsolicited_session(&self) -> Session {
        Session::unsolicited(self.sp_entity_id.clone())
    }
}

#[async_trait]
impl Provider for SamlProvider {
    type Session = Session;
    type User = IdentityRecord;
    type Error = SamlError;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    async fn begin_auth(&self, state: &str) -> Result<Session, SamlError> {
        let config = self.registry.resolve(&self.sp_entity_id).await?;
        let redirect = AuthRequestBuilder::new(&config).build_redirect_url(Some(state))?;

        Ok(Session::new(
            self.sp_entity_id.clone(),
            redirect.url,
            redirect.request_id,
            Some(state.to_string()),
        ))
    }

    fn unmarshal_session(&self, data: &str) -> Result<Session, SamlError> {
        Session::unmarshal(data)
    }

    async fn fetch_user(&self, session: Session) -> Result<IdentityRecord, SamlError> {
        let assertion = session.into_assertion()?;

        let mut record = AttributeMapper::new(&self.attribute_map).map(&assertion.attributes);
        record.provider = self.name.clone();
        record.name_id = assertion.name_id.unwrap_or_default();

        tracing::debug!(
            provider = %self.name,
            assertion_id = %assertion.id,
            "Mapped SAML assertion to identity"
        );
        Ok(record)
    }

    /// SAML has no refresh tokens.
    async fn refresh_token(&self, _refresh_token: &str) -> Result<Option<Token>, SamlError> {
        Ok(None)
    }

    fn refresh_token_available(&self) -> bool {
        false
    }
}

#[async_trait]
impl ProviderSession for Session {
    type Provider = SamlProvider;

    async fn get_auth_url(&self, provider: &SamlProvider) -> Result<String, SamlError> {
        Session::get_auth_url(self, provider.registry()).await
    }

    fn marshal(&self) -> Result<String, SamlError> {
        Session::marshal(self)
    }

    async fn authorize(
        &mut self,
        provider: &SamlProvider,
        params: &HashMap<String, String>,
    ) -> Result<(), SamlError> {
        Session::authorize(self, provider.registry(), provider.validator(), params).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use base64::{Engine, engine::general_purpose::STANDARD};
    use flate2::read::DeflateDecoder;
    use url::Url;

    use super::*;
    use crate::{
        auth::{
            session::{SAML_RESPONSE_PARAM, SessionState},
            test_support::{
                ATTR_AFFILIATION, ResponseBuilder, TestIdp, demo_attribute_map, test_now,
                test_sp_config_for,
            },
            validator::Clock,
        },
        xml,
    };

    async fn provider_for(idp: &TestIdp) -> (SamlProvider, Bytes) {
        let (provider, metadata) = SamlProvider::new(
            test_sp_config_for(idp),
            demo_attribute_map(),
            ServiceProviderRegistry::new(),
        )
        .await
        .unwrap();
        let validator = provider
            .validator()
            .clone()
            .with_clock(Clock::Fixed(test_now()));
        (provider.with_validator(validator), metadata)
    }

    fn request_id_of(auth_url: &str) -> String {
        let url = Url::parse(auth_url).unwrap();
        let encoded = url
            .query_pairs()
            .find(|(k, _)| k == "SAMLRequest")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let mut inflated = String::new();
        DeflateDecoder::new(STANDARD.decode(encoded).unwrap().as_slice())
            .read_to_string(&mut inflated)
            .unwrap();
        xml::parse(&inflated).unwrap().attr("ID").unwrap().to_string()
    }

    #[tokio::test]
    async fn test_new_registers_and_returns_metadata() {
        let idp = TestIdp::generate("idp");
        let (provider, metadata) = provider_for(&idp).await;

        assert_eq!(provider.name(), PROVIDER_NAME);
        assert!(!provider.refresh_token_available());
        assert!(provider.refresh_token("x").await.unwrap().is_none());
        assert!(provider.registry().get(provider.sp_entity_id()).await.is_some());

        let metadata = std::str::from_utf8(&metadata).unwrap();
        assert!(metadata.contains(provider.sp_entity_id()));
    }

    #[tokio::test]
    async fn test_set_name() {
        let idp = TestIdp::generate("idp");
        let (mut provider, _) = provider_for(&idp).await;
        provider.set_name("corporate-sso");
        assert_eq!(provider.name(), "corporate-sso");
    }

    #[tokio::test]
    async fn test_sp_initiated_login_end_to_end() {
        let idp = TestIdp::generate("idp");
        let (provider, _) = provider_for(&idp).await;

        // Begin: session goes through the browser as a string
        let session = provider.begin_auth("state-xyz").await.unwrap();
        let auth_url = ProviderSession::get_auth_url(&session, &provider).await.unwrap();
        assert_eq!(session.relay_state(), Some("state-xyz"));
        let request_id = request_id_of(&auth_url);
        assert_eq!(session.request_id(), Some(request_id.as_str()));

        let data = ProviderSession::marshal(&session).unwrap();
        let mut session = provider.unmarshal_session(&data).unwrap();

        // Callback
        let response = ResponseBuilder::new()
            .in_response_to(Some(&request_id))
            .build_base64(&idp);
        let params = HashMap::from([(SAML_RESPONSE_PARAM.to_string(), response)]);
        ProviderSession::authorize(&mut session, &provider, &params)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Authorized);

        let user = provider.fetch_user(session).await.unwrap();
        assert_eq!(user.provider, PROVIDER_NAME);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.name, "Alice Smith");
        assert_eq!(user.first_name, "Alice");
        assert_eq!(user.last_name, "Smith");
        assert_eq!(user.user_id, "alice-1234");
        assert_eq!(user.nick_name, "");
        assert_eq!(user.name_id, "alice@example.com");
        assert_eq!(user.raw_data[ATTR_AFFILIATION], vec!["member", "staff"]);
    }

    #[tokio::test]
    async fn test_untrusted_certificate_end_to_end() {
        let idp = TestIdp::generate("idp");
        let attacker = TestIdp::generate("attacker");
        let (provider, _) = provider_for(&idp).await;

        let mut session = provider.begin_auth("state").await.unwrap();
        let request_id = session.request_id().unwrap().to_string();
        let response = ResponseBuilder::new()
            .in_response_to(Some(&request_id))
            .build_base64(&attacker);
        let params = HashMap::from([(SAML_RESPONSE_PARAM.to_string(), response)]);

        let err = ProviderSession::authorize(&mut session, &provider, &params)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Signature(_)));
        assert!(err.is_authentication_failure());
        assert!(matches!(
            provider.fetch_user(session).await,
            Err(SamlError::NotYetAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_idp_initiated_login() {
        let idp = TestIdp::generate("idp");
        let (provider, _) = provider_for(&idp).await;

        let mut session = provider.unsolicited_session();
        let params = HashMap::from([(
            SAML_RESPONSE_PARAM.to_string(),
            ResponseBuilder::new().build_base64(&idp),
        )]);
        ProviderSession::authorize(&mut session, &provider, &params)
            .await
            .unwrap();

        let user = provider.fetch_user(session).await.unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_replayed_response_is_rejected() {
        let idp = TestIdp::generate("idp");
        let (provider, _) = provider_for(&idp).await;
        let params = HashMap::from([(
            SAML_RESPONSE_PARAM.to_string(),
            ResponseBuilder::new().build_base64(&idp),
        )]);

        let mut first = provider.unsolicited_session();
        ProviderSession::authorize(&mut first, &provider, &params)
            .await
            .unwrap();

        let mut second = provider.unsolicited_session();
        let err = ProviderSession::authorize(&mut second, &provider, &params)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::ReplayOrUnsolicited(_)));
    }

    #[tokio::test]
    async fn test_fetch_user_before_authorize() {
        let idp = TestIdp::generate("idp");
        let (provider, _) = provider_for(&idp).await;
        let session = provider.begin_auth("state").await.unwrap();
        assert!(matches!(
            provider.fetch_user(session).await,
            Err(SamlError::NotYetAuthenticated)
        ));
    }
}
