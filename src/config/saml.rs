use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::auth::{
    AttributeMap, IdpMetadata, ServiceProviderConfig, load_certificate_pem, load_private_key_pem,
};

/// SAML service provider configuration.
///
/// Key material and IdP metadata can be given inline or as file paths;
/// exactly one source is allowed for each.
///
/// ```toml
/// [saml]
/// metadata_url = "https://sp.example.com/saml/metadata"
/// acs_url = "https://sp.example.com/saml/acs"
/// slo_url = "https://sp.example.com/saml/slo"
/// certificate_path = "sp.crt"
/// private_key_path = "sp.key"
/// idp_metadata_path = "idp-metadata.xml"
///
/// [saml.attributes]
/// email = "urn:oid:0.9.2342.19200300.100.1.3"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// URL the SP metadata is served from.
    pub metadata_url: String,

    /// Assertion Consumer Service URL.
    pub acs_url: String,

    /// Single Logout URL, advertised in metadata.
    pub slo_url: String,

    /// Entity ID override. Defaults to `metadata_url`.
    #[serde(default)]
    pub entity_id: Option<String>,

    /// Path to the PEM encoded SP certificate.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Inline PEM encoded SP certificate.
    #[serde(default)]
    pub certificate: Option<String>,

    /// Path to the PEM encoded SP private key.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Inline PEM encoded SP private key.
    #[serde(default)]
    pub private_key: Option<String>,

    /// Path to the IdP metadata document.
    #[serde(default)]
    pub idp_metadata_path: Option<PathBuf>,

    /// Inline IdP metadata document.
    #[serde(default)]
    pub idp_metadata: Option<String>,

    /// IdP settings for deployments without a metadata document.
    #[serde(default)]
    pub idp: Option<IdpConfig>,

    /// Accept responses that were not solicited by an AuthnRequest.
    #[serde(default = "default_true")]
    pub allow_idp_initiated: bool,

    /// Value of `ForceAuthn` in AuthnRequests. Omitted when unset.
    #[serde(default)]
    pub force_authn: Option<bool>,

    /// Sign AuthnRequest redirects with the SP key.
    #[serde(default)]
    pub sign_requests: bool,

    /// NameID format requested from the IdP.
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Tolerated clock difference with the IdP, in seconds (at most an hour).
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// Cookie holding the in-flight login session.
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Which assertion attribute feeds each identity field.
    #[serde(default)]
    pub attributes: AttributeMap,
}

/// IdP settings given field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdpConfig {
    pub entity_id: String,
    /// HTTP-Redirect SSO endpoint.
    pub sso_url: String,
    /// PEM encoded signing certificates.
    pub certificates: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_clock_skew_secs() -> u64 {
    180
}

/// Largest accepted `clock_skew_secs`.
pub const MAX_CLOCK_SKEW_SECS: u64 = 3600;

fn default_session_cookie_name() -> String {
    "saml_session".to_string()
}

impl SamlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        exactly_one(
            "saml.certificate_path or saml.certificate",
            [self.certificate_path.is_some(), self.certificate.is_some()],
        )?;
        exactly_one(
            "saml.private_key_path or saml.private_key",
            [self.private_key_path.is_some(), self.private_key.is_some()],
        )?;
        exactly_one(
            "saml.idp_metadata_path, saml.idp_metadata or [saml.idp]",
            [
                self.idp_metadata_path.is_some(),
                self.idp_metadata.is_some(),
                self.idp.is_some(),
            ],
        )?;

        if self.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            return Err(ConfigError::Validation(format!(
                "saml.clock_skew_secs must be at most {MAX_CLOCK_SKEW_SECS}, got {}",
                self.clock_skew_secs
            )));
        }
        if self.session_cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "saml.session_cookie_name must not be empty".into(),
            ));
        }
        if let Some(idp) = &self.idp
            && idp.certificates.is_empty()
        {
            return Err(ConfigError::Validation(
                "saml.idp.certificates must list at least one certificate".into(),
            ));
        }
        Ok(())
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Load key material and IdP metadata and assemble the SP configuration.
    pub fn build_service_provider(&self) -> Result<ServiceProviderConfig, ConfigError> {
        let certificate = read_source(self.certificate_path.as_deref(), &self.certificate)?;
        let private_key = read_source(self.private_key_path.as_deref(), &self.private_key)?;

        let idp_metadata = match (&self.idp, &self.idp_metadata_path, &self.idp_metadata) {
            (Some(idp), _, _) => {
                IdpMetadata::from_parts(&idp.entity_id, &idp.sso_url, &idp.certificates)?
            }
            (None, path, inline) => {
                let xml = read_source(path.as_deref(), inline)?;
                IdpMetadata::from_xml(&xml)?
            }
        };

        let mut config = ServiceProviderConfig::new(
            load_certificate_pem(certificate.as_bytes())?,
            load_private_key_pem(private_key.as_bytes())?,
            idp_metadata,
            &self.metadata_url,
            &self.acs_url,
            &self.slo_url,
        )?
        .with_allow_idp_initiated(self.allow_idp_initiated)
        .with_force_authn(self.force_authn)
        .with_sign_requests(self.sign_requests)
        .with_name_id_format(self.name_id_format.clone());

        if let Some(entity_id) = &self.entity_id {
            config = config.with_entity_id(entity_id.clone());
        }

        tracing::debug!(
            entity_id = %config.entity_id(),
            idp_entity_id = config.idp_metadata().entity_id().unwrap_or("<unknown>"),
            "Loaded SAML service provider configuration"
        );
        Ok(config)
    }
}

fn exactly_one<const N: usize>(what: &str, present: [bool; N]) -> Result<(), ConfigError> {
    match present.iter().filter(|p| **p).count() {
        1 => Ok(()),
        0 => Err(ConfigError::Validation(format!("{what} is required"))),
        _ => Err(ConfigError::Validation(format!(
            "only one of {what} may be set"
        ))),
    }
}

fn read_source(path: Option<&Path>, inline: &Option<String>) -> Result<String, ConfigError> {
    match (path, inline) {
        (Some(path), _) => {
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e, path.to_path_buf()))
        }
        (None, Some(inline)) => Ok(inline.clone()),
        (None, None) => Err(ConfigError::Validation(
            "missing SAML configuration source".into(),
        )),
    }
}
