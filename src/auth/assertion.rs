//! The identity-bearing content of a validated SAML assertion.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SamlError;
use crate::xml::{Element, NS_ASSERTION};

/// A validated assertion.
///
/// Only produced by [`AssertionValidator`](super::AssertionValidator) after
/// every check has passed; sessions carry it between the ACS callback and
/// identity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Assertion {
    #[serde(rename = "ID")]
    pub id: String,
    pub issuer: String,
    #[serde(rename = "NameID")]
    pub name_id: Option<String>,
    #[serde(rename = "NameIDFormat")]
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    /// Attribute name -> values in document order. Repeated attributes append.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Assertion {
    /// Read the assertion fields out of a `saml:Assertion` element.
    ///
    /// This performs no trust checks of its own.
    pub(crate) fn from_element(element: &Element) -> Result<Self, SamlError> {
        let id = element
            .attr("ID")
            .ok_or_else(|| SamlError::InvalidResponse("assertion has no ID".to_string()))?
            .to_string();

        let issuer = element
            .child(NS_ASSERTION, "Issuer")
            .map(|issuer| issuer.text().trim().to_string())
            .filter(|issuer| !issuer.is_empty())
            .ok_or_else(|| SamlError::InvalidResponse("assertion has no Issuer".to_string()))?;

        let name_id = element
            .child(NS_ASSERTION, "Subject")
            .and_then(|subject| subject.child(NS_ASSERTION, "NameID"));

        let session_index = element
            .children_named(NS_ASSERTION, "AuthnStatement")
            .find_map(|statement| statement.attr("SessionIndex"))
            .map(str::to_string);

        let conditions = element.child(NS_ASSERTION, "Conditions");
        let not_before = conditions
            .and_then(|c| c.attr("NotBefore"))
            .map(parse_instant)
            .transpose()?;
        let not_on_or_after = conditions
            .and_then(|c| c.attr("NotOnOrAfter"))
            .map(parse_instant)
            .transpose()?;

        let audiences = conditions
            .into_iter()
            .flat_map(|c| c.children_named(NS_ASSERTION, "AudienceRestriction"))
            .flat_map(|restriction| restriction.children_named(NS_ASSERTION, "Audience"))
            .map(|audience| audience.text().trim().to_string())
            .collect();

        Ok(Self {
            id,
            issuer,
            name_id: name_id.map(|n| n.text().trim().to_string()),
            name_id_format: name_id.and_then(|n| n.attr("Format")).map(str::to_string),
            session_index,
            not_before,
            not_on_or_after,
            audiences,
            attributes: extract_attributes(element),
        })
    }
}

fn extract_attributes(assertion: &Element) -> BTreeMap<String, Vec<String>> {
    let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for attribute in assertion
        .children_named(NS_ASSERTION, "AttributeStatement")
        .flat_map(|statement| statement.children_named(NS_ASSERTION, "Attribute"))
    {
        let Some(name) = attribute.attr("Name") else {
            continue;
        };
        let values = attribute
            .children_named(NS_ASSERTION, "AttributeValue")
            .map(|value| value.text());
        attributes.entry(name.to_string()).or_default().extend(values);
    }

    attributes
}

/// Parse an `xs:dateTime` instant (always UTC in SAML).
pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>, SamlError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| SamlError::InvalidResponse(format!("invalid timestamp '{value}': {e}")))
}
