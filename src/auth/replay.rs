//! In-memory record of consumed assertion IDs.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

/// Remembers assertion IDs until their validity window closes, so a captured
/// response cannot be posted to the ACS a second time.
#[derive(Debug, Default)]
pub struct ReplayCache {
    seen: DashMap<String, DateTime<Utc>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as used until `expires_at`.
    ///
    /// Returns `false` if the ID was already recorded and has not expired.
    /// Expired entries are purged on every call.
    pub fn check_and_record(&self, id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.seen.retain(|_, expiry| *expiry > now);

        match self.seen.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
