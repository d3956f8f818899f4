//! SAML Response validation.
//!
//! [`AssertionValidator::validate`] turns the raw `SAMLResponse` form value
//! into a trusted [`Assertion`], or explains which check rejected it. The
//! checks run in a fixed order and the first failure wins:
//!
//! 1. base64 / UTF-8 decoding
//! 2. XML parsing (no DTDs) and protocol structure
//! 3. XML signatures over the Response and/or the Assertion
//! 4. validity window (Conditions and bearer SubjectConfirmationData)
//! 5. audience restriction
//! 6. `InResponseTo` correlation, unsolicited policy and replay
//! 7. attribute extraction

use std::{collections::HashSet, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};

use super::{
    SamlError,
    assertion::{Assertion, parse_instant},
    replay::ReplayCache,
    sp_config::ServiceProviderConfig,
};
use crate::xml::{
    Document, Element, NS_ASSERTION, NS_PROTOCOL,
    dsig::{self, SignatureStatus},
};

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const CONFIRMATION_METHOD_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// Default tolerance for clock drift between SP and IdP.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(180);

/// How long an assertion ID is remembered when the assertion carries no expiry.
const REPLAY_FALLBACK_TTL_SECS: i64 = 3600;

/// Source of the current time for validity checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    /// Always reports the given instant (tests, replaying captured traffic).
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(instant) => *instant,
        }
    }
}

/// Validates SAML Responses against a [`ServiceProviderConfig`].
#[derive(Debug, Clone)]
pub struct AssertionValidator {
    clock: Clock,
    clock_skew: TimeDelta,
    replay_cache: Option<Arc<ReplayCache>>,
}

impl Default for AssertionValidator {
    fn default() -> Self {
        Self {
            clock: Clock::System,
            clock_skew: skew_delta(DEFAULT_CLOCK_SKEW),
            replay_cache: None,
        }
    }
}

impl AssertionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew_delta(skew);
        self
    }

    /// Reject assertions whose ID has already been accepted.
    pub fn with_replay_cache(mut self, cache: Arc<ReplayCache>) -> Self {
        self.replay_cache = Some(cache);
        self
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Validate a base64 encoded `SAMLResponse`.
    ///
    /// `expected_request_id` is the ID of the AuthnRequest this login started
    /// with, or `None` for IdP-initiated sessions.
    pub fn validate(
        &self,
        config: &ServiceProviderConfig,
        raw_response: &str,
        expected_request_id: Option<&str>,
    ) -> Result<Assertion, SamlError> {
        // Decode
        let compact: String = raw_response
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| SamlError::Decode(format!("invalid base64: {e}")))?;
        let document = String::from_utf8(bytes)
            .map_err(|_| SamlError::Decode("response is not valid UTF-8".to_string()))?;

        tracing::debug!(xml_len = document.len(), "Decoded SAML response");

        // Parse and check structure
        let document = Document::parse(&document)?;
        let response = &document.root;
        if !response.is(NS_PROTOCOL, "Response") {
            return Err(SamlError::Parse(format!(
                "expected samlp:Response, found '{}'",
                response.qualified_name()
            )));
        }

        reject_duplicate_ids(response)?;
        check_status(response)?;

        if let Some(destination) = response.attr("Destination")
            && destination != config.acs_url()
        {
            return Err(SamlError::InvalidResponse(format!(
                "Destination '{destination}' does not match the ACS URL"
            )));
        }

        let assertion_element = single_assertion(response)?;

        // Signatures
        let trusted = config.idp_metadata().signing_certificates();
        let response_signature = dsig::verify_enveloped(&document, response, trusted)?;
        let assertion_signature = dsig::verify_enveloped(&document, assertion_element, trusted)?;
        if response_signature == SignatureStatus::Unsigned
            && assertion_signature == SignatureStatus::Unsigned
        {
            return Err(SamlError::Signature(
                "neither the response nor the assertion is signed".to_string(),
            ));
        }

        let assertion = Assertion::from_element(assertion_element)?;

        if let Some(idp_entity_id) = config.idp_metadata().entity_id() {
            if assertion.issuer != idp_entity_id {
                return Err(SamlError::InvalidResponse(format!(
                    "assertion issuer '{}' is not the trusted IdP",
                    assertion.issuer
                )));
            }
            if let Some(issuer) = response.child(NS_ASSERTION, "Issuer")
                && issuer.text().trim() != idp_entity_id
            {
                return Err(SamlError::InvalidResponse(
                    "response issuer is not the trusted IdP".to_string(),
                ));
            }
        }

        // Validity window
        let now = self.clock.now();
        let confirmations = bearer_confirmations(assertion_element);
        let mut confirmation_expiry = None;
        let mut in_response_to = Vec::new();

        self.check_window(now, assertion.not_before, assertion.not_on_or_after)?;
        for data in &confirmations {
            let not_on_or_after = data.attr("NotOnOrAfter").map(parse_instant).transpose()?;
            self.check_window(now, None, not_on_or_after)?;
            confirmation_expiry = earliest(confirmation_expiry, not_on_or_after);

            if let Some(recipient) = data.attr("Recipient")
                && recipient != config.acs_url()
            {
                return Err(SamlError::InvalidResponse(format!(
                    "SubjectConfirmationData Recipient '{recipient}' does not match the ACS URL"
                )));
            }
            if let Some(id) = data.attr("InResponseTo") {
                in_response_to.push(id);
            }
        }

        // Audience
        check_audience(assertion_element, config.entity_id())?;

        // Request correlation
        if let Some(id) = response.attr("InResponseTo") {
            in_response_to.push(id);
        }
        if in_response_to.is_empty() {
            if !config.allow_idp_initiated() {
                return Err(SamlError::ReplayOrUnsolicited(
                    "unsolicited response and IdP-initiated login is disabled".to_string(),
                ));
            }
        } else {
            for id in &in_response_to {
                match expected_request_id {
                    Some(expected) if expected == *id => {}
                    Some(_) => {
                        return Err(SamlError::ReplayOrUnsolicited(
                            "InResponseTo does not match the request".to_string(),
                        ));
                    }
                    None => {
                        return Err(SamlError::ReplayOrUnsolicited(
                            "response answers a request this session did not make".to_string(),
                        ));
                    }
                }
            }
        }

        if let Some(cache) = &self.replay_cache {
            let expires_at = earliest(assertion.not_on_or_after, confirmation_expiry)
                .or_else(|| now.checked_add_signed(TimeDelta::seconds(REPLAY_FALLBACK_TTL_SECS)))
                .and_then(|expiry| expiry.checked_add_signed(self.clock_skew))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if !cache.check_and_record(&assertion.id, expires_at, now) {
                return Err(SamlError::ReplayOrUnsolicited(format!(
                    "assertion '{}' has already been used",
                    assertion.id
                )));
            }
        }

        tracing::info!(
            assertion_id = %assertion.id,
            issuer = %assertion.issuer,
            attributes = assertion.attributes.len(),
            idp_initiated = in_response_to.is_empty(),
            "SAML assertion validated"
        );

        Ok(assertion)
    }

    fn check_window(
        &self,
        now: DateTime<Utc>,
        not_before: Option<DateTime<Utc>>,
        not_on_or_after: Option<DateTime<Utc>>,
    ) -> Result<(), SamlError> {
        // A bound pushed past the representable range by the skew cannot be hit
        if let Some(not_before) = not_before
            && now
                .checked_add_signed(self.clock_skew)
                .is_some_and(|latest| latest < not_before)
        {
            return Err(SamlError::Expired(format!(
                "assertion not valid before {not_before}"
            )));
        }
        if let Some(not_on_or_after) = not_on_or_after
            && now
                .checked_sub_signed(self.clock_skew)
                .is_some_and(|earliest| earliest >= not_on_or_after)
        {
            return Err(SamlError::Expired(format!(
                "assertion expired at {not_on_or_after}"
            )));
        }
        Ok(())
    }
}

fn skew_delta(skew: Duration) -> TimeDelta {
    TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX)
}

fn earliest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Signature wrapping attacks rely on two elements sharing an ID so that the
/// verified element and the consumed element differ.
fn reject_duplicate_ids(root: &Element) -> Result<(), SamlError> {
    let mut seen = HashSet::new();
    let mut duplicate = None;
    root.walk(&mut |element| {
        if let Some(id) = element.attr("ID")
            && !seen.insert(id)
        {
            duplicate.get_or_insert(id);
        }
    });

    match duplicate {
        Some(id) => Err(SamlError::Signature(format!(
            "document contains duplicate ID '{id}'"
        ))),
        None => Ok(()),
    }
}

fn check_status(response: &Element) -> Result<(), SamlError> {
    let code = response
        .child(NS_PROTOCOL, "Status")
        .and_then(|status| status.child(NS_PROTOCOL, "StatusCode"))
        .ok_or_else(|| SamlError::InvalidResponse("response has no StatusCode".to_string()))?;

    let value = code.attr("Value").unwrap_or_default();
    if value == STATUS_SUCCESS {
        return Ok(());
    }

    // Second-level codes carry the useful detail (e.g. AuthnFailed)
    let detail = code
        .child(NS_PROTOCOL, "StatusCode")
        .and_then(|sub| sub.attr("Value"));
    Err(SamlError::Status(match detail {
        Some(detail) => format!("{value} ({detail})"),
        None => value.to_string(),
    }))
}

fn single_assertion(response: &Element) -> Result<&Element, SamlError> {
    if response.child(NS_ASSERTION, "EncryptedAssertion").is_some() {
        return Err(SamlError::InvalidResponse(
            "encrypted assertions are not supported".to_string(),
        ));
    }

    let mut assertions = response.children_named(NS_ASSERTION, "Assertion");
    match (assertions.next(), assertions.next()) {
        (Some(assertion), None) => Ok(assertion),
        (None, _) => Err(SamlError::InvalidResponse(
            "response contains no assertion".to_string(),
        )),
        (Some(_), Some(_)) => Err(SamlError::InvalidResponse(
            "response contains more than one assertion".to_string(),
        )),
    }
}

fn bearer_confirmations(assertion: &Element) -> Vec<&Element> {
    assertion
        .child(NS_ASSERTION, "Subject")
        .into_iter()
        .flat_map(|subject| subject.children_named(NS_ASSERTION, "SubjectConfirmation"))
        .filter(|confirmation| confirmation.attr("Method") == Some(CONFIRMATION_METHOD_BEARER))
        .filter_map(|confirmation| confirmation.child(NS_ASSERTION, "SubjectConfirmationData"))
        .collect()
}

/// Every `AudienceRestriction` must name this SP; at least one is required.
fn check_audience(assertion: &Element, entity_id: &str) -> Result<(), SamlError> {
    let restrictions: Vec<&Element> = assertion
        .child(NS_ASSERTION, "Conditions")
        .into_iter()
        .flat_map(|conditions| conditions.children_named(NS_ASSERTION, "AudienceRestriction"))
        .collect();

    if restrictions.is_empty() {
        return Err(SamlError::AudienceMismatch(
            "assertion has no audience restriction".to_string(),
        ));
    }

    for restriction in restrictions {
        let allowed = restriction
            .children_named(NS_ASSERTION, "Audience")
            .any(|audience| audience.text().trim() == entity_id);
        if !allowed {
            return Err(SamlError::AudienceMismatch(format!(
                "'{entity_id}' is not an intended audience"
            )));
        }
    }
    Ok(())
}
