//! Mapping of assertion attributes onto a fixed identity record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which SAML attribute feeds each identity field.
///
/// Values are attribute `Name`s as sent by the IdP, usually URIs or OIDs
/// such as `urn:oid:0.9.2342.19200300.100.1.3`. Unset fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttributeMap {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "userID")]
    pub user_id: Option<String>,
    #[serde(default, rename = "avatarURL")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// The identity handed to the application after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub provider: String,
    /// Every attribute of the assertion, unmodified.
    pub raw_data: BTreeMap<String, Vec<String>>,
    pub email: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub nick_name: String,
    pub description: String,
    pub user_id: String,
    pub avatar_url: String,
    pub location: String,
    /// Subject NameID of the assertion, empty if none was sent.
    pub name_id: String,
}

/// Projects attribute values onto an [`IdentityRecord`].
#[derive(Debug, Clone, Copy)]
pub struct AttributeMapper<'a> {
    attribute_map: &'a AttributeMap,
}

impl<'a> AttributeMapper<'a> {
    pub fn new(attribute_map: &'a AttributeMap) -> Self {
        Self { attribute_map }
    }

    /// Fill each mapped field with the first value of its source attribute.
    ///
    /// Later values of multi-valued attributes are only available through
    /// `raw_data`.
    pub fn map(&self, attributes: &BTreeMap<String, Vec<String>>) -> IdentityRecord {
        let map = self.attribute_map;
        let first = |source: &Option<String>| -> String {
            source
                .as_deref()
                .and_then(|name| attributes.get(name))
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_default()
        };

        IdentityRecord {
            raw_data: attributes.clone(),
            email: first(&map.email),
            name: first(&map.name),
            first_name: first(&map.first_name),
            last_name: first(&map.last_name),
            nick_name: first(&map.nick_name),
            description: first(&map.description),
            user_id: first(&map.user_id),
            avatar_url: first(&map.avatar_url),
            location: first(&map.location),
            ..IdentityRecord::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{ATTR_AFFILIATION, ATTR_EMAIL, demo_attribute_map};

    fn attributes(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_absent_attribute_maps_to_empty_string() {
        let map = demo_attribute_map();
        let record = AttributeMapper::new(&map).map(&attributes(&[(ATTR_EMAIL, &["a@b.c"])]));

        assert_eq!(record.email, "a@b.c");
        assert_eq!(record.first_name, "");
        assert_eq!(record.location, "");
    }

    #[test]
    fn test_multi_valued_attribute_uses_first_value() {
        let map = AttributeMap {
            description: Some(ATTR_AFFILIATION.to_string()),
            ..AttributeMap::default()
        };
        let raw = attributes(&[(ATTR_AFFILIATION, &["member", "staff"])]);
        let record = AttributeMapper::new(&map).map(&raw);

        assert_eq!(record.description, "member");
        assert_eq!(record.raw_data, raw);
    }

    #[test]
    fn test_empty_value_list_maps_to_empty_string() {
        let map = demo_attribute_map();
        let record = AttributeMapper::new(&map).map(&attributes(&[(ATTR_EMAIL, &[])]));
        assert_eq!(record.email, "");
        assert!(record.raw_data.contains_key(ATTR_EMAIL));
    }

    #[test]
    fn test_unmapped_fields_stay_empty() {
        let map = AttributeMap::default();
        let record = AttributeMapper::new(&map).map(&attributes(&[(ATTR_EMAIL, &["a@b.c"])]));
        assert_eq!(record.email, "");
        assert_eq!(record.raw_data.len(), 1);
    }

    #[test]
    fn test_attribute_map_deserializes_config_keys() {
        let map: AttributeMap = serde_json::from_str(
            r#"{"email":"mail","firstName":"givenName","userID":"uid","avatarURL":"photo"}"#,
        )
        .unwrap();
        assert_eq!(map.email.as_deref(), Some("mail"));
        assert_eq!(map.first_name.as_deref(), Some("givenName"));
        assert_eq!(map.user_id.as_deref(), Some("uid"));
        assert_eq!(map.avatar_url.as_deref(), Some("photo"));

        let unknown = serde_json::from_str::<AttributeMap>(r#"{"mail":"x"}"#);
        assert!(unknown.is_err());
    }
}
