//! Capability traits for federated login providers.
//!
//! These describe the begin → redirect → callback → fetch-identity lifecycle
//! without reference to any particular protocol, so an application can drive
//! SAML next to other providers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token returned by providers that support refreshing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    type Session: ProviderSession<Provider = Self>;
    type User: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: &str);

    /// Start a login; `state` is round-tripped through the identity provider.
    async fn begin_auth(&self, state: &str) -> Result<Self::Session, Self::Error>;

    fn unmarshal_session(&self, data: &str) -> Result<Self::Session, Self::Error>;

    /// Consume an authorized session and return the user it identifies.
    async fn fetch_user(&self, session: Self::Session) -> Result<Self::User, Self::Error>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<Option<Token>, Self::Error>;

    fn refresh_token_available(&self) -> bool;
}

#[async_trait]
pub trait ProviderSession: Send + Sync + Sized {
    type Provider: Provider<Session = Self>;

    /// URL to send the browser to.
    async fn get_auth_url(
        &self,
        provider: &Self::Provider,
    ) -> Result<String, <Self::Provider as Provider>::Error>;

    fn marshal(&self) -> Result<String, <Self::Provider as Provider>::Error>;

    /// Complete the login from the callback parameters.
    async fn authorize(
        &mut self,
        provider: &Self::Provider,
        params: &HashMap<String, String>,
    ) -> Result<(), <Self::Provider as Provider>::Error>;
}
