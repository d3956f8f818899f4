//! Service Provider trust material.
//!
//! A [`ServiceProviderConfig`] bundles everything one SP needs to talk to its
//! IdP: the SP's own key pair and endpoint URLs, and the trusted
//! [`IdpMetadata`] (signing certificates and SSO endpoint). It is validated
//! once at construction and immutable afterwards.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    pkey::{PKey, Private},
    x509::X509,
};
use quick_xml::escape::escape;
use samael::metadata::EntityDescriptor;
use url::Url;

use super::SamlError;

pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const NAME_ID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

// ─────────────────────────────────────────────────────────────────────────────
// IdP Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// The trusted Identity Provider as seen by this SP.
#[derive(Debug, Clone)]
pub struct IdpMetadata {
    descriptor: EntityDescriptor,
    entity_id: Option<String>,
    sso_url: Option<String>,
    signing_certificates: Vec<X509>,
}

impl IdpMetadata {
    /// Parse an IdP `EntityDescriptor` metadata document.
    pub fn from_xml(xml: &str) -> Result<Self, SamlError> {
        let descriptor: EntityDescriptor = samael::metadata::de::from_str(xml).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse IdP metadata");
            SamlError::Config(format!("failed to parse IdP metadata: {e}"))
        })?;
        Self::from_descriptor(descriptor)
    }

    /// Build metadata from individual settings when no metadata document is
    /// available. Certificates are PEM encoded.
    pub fn from_parts(
        entity_id: &str,
        sso_url: &str,
        certificates_pem: &[String],
    ) -> Result<Self, SamlError> {
        if certificates_pem.is_empty() {
            return Err(SamlError::Config(
                "at least one IdP signing certificate is required".to_string(),
            ));
        }

        let key_descriptors: String = certificates_pem
            .iter()
            .map(|pem| {
                format!(
                    r#"
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#,
                    strip_pem_headers(pem)
                )
            })
            .collect();

        let xml = format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">{}
        <md:SingleSignOnService Binding="{}" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            escape(entity_id),
            key_descriptors,
            BINDING_HTTP_REDIRECT,
            escape(sso_url),
        );

        Self::from_xml(&xml)
    }

    fn from_descriptor(descriptor: EntityDescriptor) -> Result<Self, SamlError> {
        let idp_descriptors = descriptor
            .idp_sso_descriptors
            .as_deref()
            .filter(|descriptors| !descriptors.is_empty())
            .ok_or_else(|| {
                SamlError::Config("IdP metadata has no IDPSSODescriptor".to_string())
            })?;

        let sso_url = idp_descriptors
            .iter()
            .flat_map(|idp| idp.single_sign_on_services.iter())
            .find(|endpoint| endpoint.binding == BINDING_HTTP_REDIRECT)
            .map(|endpoint| endpoint.location.clone());

        let mut signing_certificates = Vec::new();
        for key_descriptor in idp_descriptors
            .iter()
            .flat_map(|idp| idp.key_descriptors.iter())
        {
            // `use` absent means the key serves both signing and encryption
            if key_descriptor
                .key_use
                .as_deref()
                .is_some_and(|key_use| key_use != "signing")
            {
                continue;
            }
            let Some(x509_data) = &key_descriptor.key_info.x509_data else {
                continue;
            };
            for certificate in &x509_data.certificates {
                signing_certificates.push(parse_certificate_body(certificate)?);
            }
        }

        if signing_certificates.is_empty() {
            return Err(SamlError::Config(
                "IdP metadata has no signing certificate".to_string(),
            ));
        }

        tracing::debug!(
            idp_entity_id = ?descriptor.entity_id,
            has_sso_url = sso_url.is_some(),
            certificates = signing_certificates.len(),
            "Loaded IdP metadata"
        );

        Ok(Self {
            entity_id: descriptor.entity_id.clone(),
            descriptor,
            sso_url,
            signing_certificates,
        })
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// HTTP-Redirect `SingleSignOnService` location, if the IdP advertises one.
    pub fn sso_url(&self) -> Option<&str> {
        self.sso_url.as_deref()
    }

    pub fn signing_certificates(&self) -> &[X509] {
        &self.signing_certificates
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Provider Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable trust configuration for one Service Provider.
#[derive(Debug, Clone)]
pub struct ServiceProviderConfig {
    entity_id: String,
    signing_key: PKey<Private>,
    signing_cert: X509,
    metadata_url: String,
    acs_url: String,
    slo_url: String,
    idp_metadata: IdpMetadata,
    allow_idp_initiated: bool,
    force_authn: Option<bool>,
    sign_requests: bool,
    name_id_format: Option<String>,
}

impl ServiceProviderConfig {
    /// Validate and assemble an SP configuration.
    ///
    /// The entity ID defaults to the metadata URL. Fails when a URL is not
    /// absolute or when the certificate does not belong to the key.
    pub fn new(
        signing_cert: X509,
        signing_key: PKey<Private>,
        idp_metadata: IdpMetadata,
        metadata_url: &str,
        acs_url: &str,
        slo_url: &str,
    ) -> Result<Self, SamlError> {
        let metadata_url = validate_url("metadata", metadata_url)?;
        let acs_url = validate_url("ACS", acs_url)?;
        let slo_url = validate_url("SLO", slo_url)?;

        let cert_key = signing_cert
            .public_key()
            .map_err(|e| SamlError::Config(format!("invalid SP certificate: {e}")))?;
        if !cert_key.public_eq(&signing_key) {
            return Err(SamlError::Config(
                "SP certificate does not match the SP private key".to_string(),
            ));
        }

        Ok(Self {
            entity_id: metadata_url.clone(),
            signing_key,
            signing_cert,
            metadata_url,
            acs_url,
            slo_url,
            idp_metadata,
            allow_idp_initiated: true,
            force_authn: None,
            sign_requests: false,
            name_id_format: None,
        })
    }

    /// Override the entity ID (defaults to the metadata URL).
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self
    }

    pub fn with_allow_idp_initiated(mut self, allow: bool) -> Self {
        self.allow_idp_initiated = allow;
        self
    }

    pub fn with_force_authn(mut self, force_authn: Option<bool>) -> Self {
        self.force_authn = force_authn;
        self
    }

    pub fn with_sign_requests(mut self, sign_requests: bool) -> Self {
        self.sign_requests = sign_requests;
        self
    }

    pub fn with_name_id_format(mut self, format: Option<String>) -> Self {
        self.name_id_format = format;
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn signing_key(&self) -> &PKey<Private> {
        &self.signing_key
    }

    pub fn signing_cert(&self) -> &X509 {
        &self.signing_cert
    }

    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    pub fn acs_url(&self) -> &str {
        &self.acs_url
    }

    pub fn slo_url(&self) -> &str {
        &self.slo_url
    }

    pub fn idp_metadata(&self) -> &IdpMetadata {
        &self.idp_metadata
    }

    pub fn allow_idp_initiated(&self) -> bool {
        self.allow_idp_initiated
    }

    pub fn force_authn(&self) -> Option<bool> {
        self.force_authn
    }

    pub fn sign_requests(&self) -> bool {
        self.sign_requests
    }

    pub fn name_id_format(&self) -> Option<&str> {
        self.name_id_format.as_deref()
    }

    /// Render this SP's metadata document for the IdP.
    ///
    /// Includes the signing certificate, requested NameID format, the
    /// HTTP-POST assertion consumer service and the HTTP-Redirect logout
    /// endpoint.
    pub fn metadata_xml(&self) -> Result<String, SamlError> {
        let cert_der = self
            .signing_cert
            .to_der()
            .map_err(|e| SamlError::Config(format!("failed to encode SP certificate: {e}")))?;

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="{signed}" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{certificate}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleLogoutService Binding="{redirect}" Location="{slo_url}"/>
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{post}" Location="{acs_url}" index="1"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            entity_id = escape(&self.entity_id),
            signed = self.sign_requests,
            certificate = STANDARD.encode(cert_der),
            redirect = BINDING_HTTP_REDIRECT,
            slo_url = escape(&self.slo_url),
            name_id_format = escape(self.name_id_format().unwrap_or(NAME_ID_FORMAT_UNSPECIFIED)),
            post = BINDING_HTTP_POST,
            acs_url = escape(&self.acs_url),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key material helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a PEM encoded X.509 certificate.
pub fn load_certificate_pem(pem: &[u8]) -> Result<X509, SamlError> {
    X509::from_pem(pem).map_err(|e| SamlError::Config(format!("invalid certificate PEM: {e}")))
}

/// Parse a PEM encoded private key (PKCS#8 or PKCS#1).
pub fn load_private_key_pem(pem: &[u8]) -> Result<PKey<Private>, SamlError> {
    PKey::private_key_from_pem(pem)
        .map_err(|e| SamlError::Config(format!("invalid private key PEM: {e}")))
}

/// Strip PEM armor, leaving the base64 body on one line.
pub fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("")
}

fn parse_certificate_body(body: &str) -> Result<X509, SamlError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| SamlError::Config(format!("invalid IdP certificate encoding: {e}")))?;
    X509::from_der(&der).map_err(|e| SamlError::Config(format!("invalid IdP certificate: {e}")))
}

fn validate_url(label: &str, value: &str) -> Result<String, SamlError> {
    let url = Url::parse(value)
        .map_err(|e| SamlError::Config(format!("invalid {label} URL '{value}': {e}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(SamlError::Config(format!(
            "{label} URL '{value}' must be an absolute URL"
        )));
    }
    Ok(value.to_string())
}
