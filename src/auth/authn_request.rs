//! AuthnRequest generation for the HTTP-Redirect binding.

use rand::{RngCore, rngs::OsRng};
use samael::service_provider::ServiceProviderBuilder;

use super::{
    SamlError,
    sp_config::{NAME_ID_FORMAT_UNSPECIFIED, ServiceProviderConfig},
};

/// Redirect URL for the browser plus the ID of the request it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRedirect {
    pub url: String,
    /// Expected in the `InResponseTo` of the IdP's response.
    pub request_id: String,
}

/// Builds `AuthnRequest` redirects for one Service Provider.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequestBuilder<'a> {
    config: &'a ServiceProviderConfig,
}

impl<'a> AuthRequestBuilder<'a> {
    pub fn new(config: &'a ServiceProviderConfig) -> Self {
        Self { config }
    }

    /// Build the IdP redirect URL.
    ///
    /// The request is deflated and base64 encoded into `SAMLRequest`.
    /// `relay_state` is passed through untouched and omitted when empty.
    /// With `sign_requests` the URL also carries `SigAlg` and `Signature`.
    pub fn build_redirect_url(&self, relay_state: Option<&str>) -> Result<AuthnRedirect, SamlError> {
        let config = self.config;
        let sso_url = config.idp_metadata().sso_url().ok_or_else(|| {
            SamlError::Config(
                "IdP metadata has no HTTP-Redirect SingleSignOnService endpoint".to_string(),
            )
        })?;

        let sp = ServiceProviderBuilder::default()
            .entity_id(config.entity_id().to_string())
            .acs_url(config.acs_url().to_string())
            .idp_metadata(config.idp_metadata().descriptor().clone())
            .authn_name_id_format(
                config
                    .name_id_format()
                    .unwrap_or(NAME_ID_FORMAT_UNSPECIFIED)
                    .to_string(),
            )
            .force_authn(config.force_authn().unwrap_or(false))
            .build()
            .map_err(|e| SamlError::Config(format!("failed to build service provider: {e}")))?;

        let mut authn_request = sp
            .make_authentication_request(sso_url)
            .map_err(|e| SamlError::Config(format!("failed to create AuthnRequest: {e}")))?;

        authn_request.id = generate_request_id();
        // Leave ForceAuthn off the wire unless configured
        authn_request.force_authn = config.force_authn();

        let request_id = authn_request.id.clone();
        let relay_state = relay_state.unwrap_or_default();

        let url = if config.sign_requests() {
            authn_request
                .signed_redirect(relay_state, config.signing_key().clone())
                .map_err(|e| SamlError::Config(format!("failed to sign AuthnRequest: {e}")))?
                .ok_or_else(|| SamlError::Config("AuthnRequest has no destination".to_string()))?
        } else {
            authn_request
                .redirect(relay_state)
                .map_err(|e| SamlError::Config(format!("failed to encode AuthnRequest: {e}")))?
                .ok_or_else(|| SamlError::Config("AuthnRequest has no destination".to_string()))?
        };

        tracing::debug!(
            entity_id = %config.entity_id(),
            request_id = %request_id,
            signed = config.sign_requests(),
            "Built SAML AuthnRequest redirect"
        );

        Ok(AuthnRedirect {
            url: url.to_string(),
            request_id,
        })
    }
}

/// 160 bits from the OS RNG. XML IDs must not start with a digit, hence the prefix.
fn generate_request_id() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    format!("id-{}", hex::encode(bytes))
}
