//! Shared fixtures for SAML tests: throwaway key pairs, an IdP that signs
//! responses, and a builder for SAML Response documents.
#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::{MessageDigest, hash},
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
    x509::{X509, X509Builder, X509NameBuilder},
};
use quick_xml::escape::{escape, partial_escape};

use super::{
    identity::AttributeMap,
    sp_config::{IdpMetadata, ServiceProviderConfig},
};
use crate::xml::{
    self, NS_ASSERTION, NS_DSIG, NS_PROTOCOL,
    dsig::{DIGEST_SHA256, ENVELOPED_SIGNATURE, EXC_C14N, RSA_SHA256},
};

pub const IDP_ENTITY_ID: &str = "https://idp.example.com";
pub const IDP_SSO_URL: &str = "https://idp.example.com/sso";
pub const SP_METADATA_URL: &str = "https://sp.example.com/saml/metadata";
pub const SP_ACS_URL: &str = "https://sp.example.com/saml/acs";
pub const SP_SLO_URL: &str = "https://sp.example.com/saml/slo";

pub const ATTR_EMAIL: &str = "urn:oid:0.9.2342.19200300.100.1.3";
pub const ATTR_DISPLAY_NAME: &str = "urn:oid:2.16.840.1.113730.3.1.241";
pub const ATTR_GIVEN_NAME: &str = "urn:oid:2.5.4.42";
pub const ATTR_SURNAME: &str = "urn:oid:2.5.4.4";
pub const ATTR_SUBJECT_ID: &str = "urn:oasis:names:tc:SAML:attribute:subject-id";
pub const ATTR_AFFILIATION: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.1";

/// The instant validators are pinned to in tests.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Self-signed certificate for `key`.
pub fn self_signed_certificate(key: &PKey<Private>, common_name: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial_number = BigNum::from_u32(1).unwrap();
    builder
        .set_serial_number(&serial_number.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// An RSA key pair with a self-signed certificate, able to sign documents
/// the way an IdP does.
pub struct TestIdp {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestIdp {
    pub fn generate(common_name: &str) -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let cert = self_signed_certificate(&key, common_name);
        Self { key, cert }
    }

    pub fn cert_pem(&self) -> String {
        String::from_utf8(self.cert.to_pem().unwrap()).unwrap()
    }

    pub fn key_pem(&self) -> String {
        String::from_utf8(self.key.private_key_to_pem_pkcs8().unwrap()).unwrap()
    }

    /// Metadata trusting this key, for [`IDP_ENTITY_ID`].
    pub fn metadata(&self) -> IdpMetadata {
        IdpMetadata::from_parts(IDP_ENTITY_ID, IDP_SSO_URL, &[self.cert_pem()]).unwrap()
    }

    /// Enveloped `ds:Signature` over the root element of `xml`.
    ///
    /// The bytes of `xml` are digested as they are, so it must already be in
    /// exclusive canonical form with [`INCLUSIVE_PREFIXES`], the way the
    /// builders below write documents. The root must carry an `ID`, and the
    /// signature must be inserted without adding whitespace.
    pub fn signature_for(&self, xml: &str) -> String {
        let root = xml::parse(xml).unwrap();
        let id = root.attr("ID").unwrap();

        let digest = STANDARD.encode(hash(MessageDigest::sha256(), xml.as_bytes()).unwrap());
        let (signed_info, canonical) = signed_info_xml(id, RSA_SHA256, &digest);

        let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
        signer.update(canonical.as_bytes()).unwrap();
        let signature_value = STANDARD.encode(signer.sign_to_vec().unwrap());
        let certificate = STANDARD.encode(self.cert.to_der().unwrap());

        format!(
            r#"<ds:Signature xmlns:ds="{NS_DSIG}">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>"#
        )
    }

    /// `xml` with a signature inserted as the first child of its root.
    pub fn sign(&self, xml: &str) -> String {
        let signature = self.signature_for(xml);
        let split = xml.find('>').unwrap() + 1;
        format!("{}{}{}", &xml[..split], signature, &xml[split..])
    }
}

/// `InclusiveNamespaces PrefixList` of test signatures: the prefixes used in
/// `xsi:type` values, which exclusive canonicalization would otherwise drop.
pub const INCLUSIVE_PREFIXES: &str = "xs xsi";

/// `SignedInfo` for an enveloped signature over `#id`.
///
/// Returns the element as embedded in a `ds:Signature` that declares the
/// `ds` prefix, and its canonical form, which is what gets signed.
pub fn signed_info_xml(id: &str, signature_method: &str, digest: &str) -> (String, String) {
    let content = format!(
        concat!(
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"></ds:CanonicalizationMethod>"#,
            r#"<ds:SignatureMethod Algorithm="{signature_method}"></ds:SignatureMethod>"#,
            r##"<ds:Reference URI="#{id}"><ds:Transforms>"##,
            r#"<ds:Transform Algorithm="{enveloped}"></ds:Transform>"#,
            r#"<ds:Transform Algorithm="{c14n}"><ec:InclusiveNamespaces xmlns:ec="{c14n}" PrefixList="{prefixes}"></ec:InclusiveNamespaces></ds:Transform>"#,
            r#"</ds:Transforms><ds:DigestMethod Algorithm="{digest_method}"></ds:DigestMethod>"#,
            r#"<ds:DigestValue>{digest}</ds:DigestValue></ds:Reference>"#,
        ),
        c14n = EXC_C14N,
        signature_method = signature_method,
        id = escape(id),
        enveloped = ENVELOPED_SIGNATURE,
        prefixes = INCLUSIVE_PREFIXES,
        digest_method = DIGEST_SHA256,
        digest = digest,
    );
    (
        format!("<ds:SignedInfo>{content}</ds:SignedInfo>"),
        format!(r#"<ds:SignedInfo xmlns:ds="{NS_DSIG}">{content}</ds:SignedInfo>"#),
    )
}

/// SP configuration trusting `idp`.
pub fn test_sp_config_for(idp: &TestIdp) -> ServiceProviderConfig {
    let sp = TestIdp::generate("sp.example.com");
    ServiceProviderConfig::new(
        sp.cert,
        sp.key,
        idp.metadata(),
        SP_METADATA_URL,
        SP_ACS_URL,
        SP_SLO_URL,
    )
    .unwrap()
}

/// SP configuration trusting a freshly generated IdP.
pub fn test_sp_config() -> ServiceProviderConfig {
    test_sp_config_for(&TestIdp::generate("idp.example.com"))
}

/// Attribute map using the common LDAP/eduPerson OIDs.
pub fn demo_attribute_map() -> AttributeMap {
    AttributeMap {
        email: Some(ATTR_EMAIL.to_string()),
        name: Some(ATTR_DISPLAY_NAME.to_string()),
        first_name: Some(ATTR_GIVEN_NAME.to_string()),
        last_name: Some(ATTR_SURNAME.to_string()),
        user_id: Some(ATTR_SUBJECT_ID.to_string()),
        ..AttributeMap::default()
    }
}

fn instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builds SAML Response documents as an IdP would send them.
///
/// Output is in exclusive canonical form (sorted attributes, explicit end
/// tags, namespaces declared where they are used) so [`TestIdp`] can sign it
/// without a canonicalizer of its own.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response_id: String,
    assertion_id: String,
    issuer: String,
    destination: Option<String>,
    in_response_to: Option<String>,
    audience: Option<String>,
    status: String,
    name_id: String,
    not_before: DateTime<Utc>,
    not_on_or_after: DateTime<Utc>,
    attributes: Vec<(String, Vec<String>)>,
    sign_assertion: bool,
    sign_response: bool,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        let now = test_now();
        Self {
            response_id: "_response-1".to_string(),
            assertion_id: "_assertion-1".to_string(),
            issuer: IDP_ENTITY_ID.to_string(),
            destination: Some(SP_ACS_URL.to_string()),
            in_response_to: None,
            audience: Some(SP_METADATA_URL.to_string()),
            status: "urn:oasis:names:tc:SAML:2.0:status:Success".to_string(),
            name_id: "alice@example.com".to_string(),
            not_before: now - TimeDelta::minutes(1),
            not_on_or_after: now + TimeDelta::minutes(5),
            attributes: vec![
                (ATTR_EMAIL.to_string(), vec!["alice@example.com".to_string()]),
                (ATTR_DISPLAY_NAME.to_string(), vec!["Alice Smith".to_string()]),
                (ATTR_GIVEN_NAME.to_string(), vec!["Alice".to_string()]),
                (ATTR_SURNAME.to_string(), vec!["Smith".to_string()]),
                (ATTR_SUBJECT_ID.to_string(), vec!["alice-1234".to_string()]),
                (
                    ATTR_AFFILIATION.to_string(),
                    vec!["member".to_string(), "staff".to_string()],
                ),
            ],
            sign_assertion: true,
            sign_response: false,
        }
    }
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response_id(mut self, id: &str) -> Self {
        self.response_id = id.to_string();
        self
    }

    pub fn assertion_id(mut self, id: &str) -> Self {
        self.assertion_id = id.to_string();
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    pub fn destination(mut self, destination: Option<&str>) -> Self {
        self.destination = destination.map(str::to_string);
        self
    }

    pub fn in_response_to(mut self, id: Option<&str>) -> Self {
        self.in_response_to = id.map(str::to_string);
        self
    }

    pub fn audience(mut self, audience: Option<&str>) -> Self {
        self.audience = audience.map(str::to_string);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn name_id(mut self, name_id: &str) -> Self {
        self.name_id = name_id.to_string();
        self
    }

    pub fn not_before(mut self, instant: DateTime<Utc>) -> Self {
        self.not_before = instant;
        self
    }

    pub fn not_on_or_after(mut self, instant: DateTime<Utc>) -> Self {
        self.not_on_or_after = instant;
        self
    }

    pub fn attributes(mut self, attributes: Vec<(&str, Vec<&str>)>) -> Self {
        self.attributes = attributes
            .into_iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.into_iter().map(str::to_string).collect(),
                )
            })
            .collect();
        self
    }

    pub fn sign_assertion(mut self, sign: bool) -> Self {
        self.sign_assertion = sign;
        self
    }

    pub fn sign_response(mut self, sign: bool) -> Self {
        self.sign_response = sign;
        self
    }

    /// The `saml:Assertion` element with `signature` placed after its Issuer.
    pub fn assertion_xml(&self, signature: &str) -> String {
        let in_response_to = self
            .in_response_to
            .as_deref()
            .map(|id| format!(r#" InResponseTo="{}""#, escape(id)))
            .unwrap_or_default();
        let audience = self
            .audience
            .as_deref()
            .map(|audience| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction>",
                    partial_escape(audience)
                )
            })
            .unwrap_or_default();
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|value| {
                        format!(
                            r#"<saml:AttributeValue xsi:type="xs:string">{}</saml:AttributeValue>"#,
                            partial_escape(value)
                        )
                    })
                    .collect();
                format!(
                    r#"<saml:Attribute Name="{}" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:uri">{values}</saml:Attribute>"#,
                    escape(name)
                )
            })
            .collect();

        format!(
            concat!(
                r#"<saml:Assertion xmlns:saml="{ns_assertion}" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="{id}" IssueInstant="{issue_instant}" Version="2.0">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>{signature}"#,
                r#"<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">{name_id}</saml:NameID>"#,
                r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData{in_response_to} NotOnOrAfter="{not_on_or_after}" Recipient="{recipient}"></saml:SubjectConfirmationData></saml:SubjectConfirmation></saml:Subject>"#,
                r#"<saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}">{audience}</saml:Conditions>"#,
                r#"<saml:AuthnStatement AuthnInstant="{issue_instant}" SessionIndex="_session-1"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#,
                r#"<saml:AttributeStatement>{attributes}</saml:AttributeStatement>"#,
                r#"</saml:Assertion>"#,
            ),
            ns_assertion = NS_ASSERTION,
            id = escape(&self.assertion_id),
            issue_instant = instant(test_now()),
            issuer = partial_escape(&self.issuer),
            signature = signature,
            name_id = partial_escape(&self.name_id),
            in_response_to = in_response_to,
            not_on_or_after = instant(self.not_on_or_after),
            recipient = SP_ACS_URL,
            not_before = instant(self.not_before),
            audience = audience,
            attributes = attributes,
        )
    }

    /// The `samlp:Response` wrapping `assertion`, with `signature` after its Issuer.
    pub fn response_xml(&self, assertion: &str, signature: &str) -> String {
        let destination = self
            .destination
            .as_deref()
            .map(|d| format!(r#" Destination="{}""#, escape(d)))
            .unwrap_or_default();
        let in_response_to = self
            .in_response_to
            .as_deref()
            .map(|id| format!(r#" InResponseTo="{}""#, escape(id)))
            .unwrap_or_default();

        format!(
            concat!(
                r#"<samlp:Response xmlns:samlp="{ns_protocol}"{destination} ID="{id}"{in_response_to} IssueInstant="{issue_instant}" Version="2.0">"#,
                r#"<saml:Issuer xmlns:saml="{ns_assertion}">{issuer}</saml:Issuer>{signature}"#,
                r#"<samlp:Status><samlp:StatusCode Value="{status}"></samlp:StatusCode></samlp:Status>"#,
                "{assertion}",
                r#"</samlp:Response>"#,
            ),
            ns_protocol = NS_PROTOCOL,
            ns_assertion = NS_ASSERTION,
            id = escape(&self.response_id),
            issue_instant = instant(test_now()),
            destination = destination,
            in_response_to = in_response_to,
            issuer = partial_escape(&self.issuer),
            signature = signature,
            status = escape(&self.status),
            assertion = assertion,
        )
    }

    /// The complete response document, signed by `idp` as configured.
    pub fn build(&self, idp: &TestIdp) -> String {
        let mut assertion = self.assertion_xml("");
        if self.sign_assertion {
            assertion = self.assertion_xml(&idp.signature_for(&assertion));
        }

        let mut response = self.response_xml(&assertion, "");
        if self.sign_response {
            response = self.response_xml(&assertion, &idp.signature_for(&response));
        }
        response
    }

    /// The response as it arrives in the `SAMLResponse` form field.
    pub fn build_base64(&self, idp: &TestIdp) -> String {
        STANDARD.encode(self.build(idp))
    }
}
