mod assertion;
mod authn_request;
mod error;
mod identity;
pub mod provider;
mod replay;
pub mod saml;
mod saml_registry;
mod session;
mod sp_config;
#[cfg(test)]
pub(crate) mod test_support;
mod validator;

pub use assertion::Assertion;
pub use authn_request::{AuthRequestBuilder, AuthnRedirect};
pub use error::SamlError;
pub use identity::{AttributeMap, AttributeMapper, IdentityRecord};
pub use provider::{Provider, ProviderSession, Token};
pub use replay::ReplayCache;
pub use saml::{PROVIDER_NAME, SamlProvider};
pub use saml_registry::ServiceProviderRegistry;
pub use session::{SAML_RESPONSE_PARAM, Session, SessionState};
pub use sp_config::{
    BINDING_HTTP_POST, BINDING_HTTP_REDIRECT, IdpMetadata, NAME_ID_FORMAT_UNSPECIFIED,
    ServiceProviderConfig, load_certificate_pem, load_private_key_pem, strip_pem_headers,
};
pub use validator::{AssertionValidator, Clock, DEFAULT_CLOCK_SKEW};
