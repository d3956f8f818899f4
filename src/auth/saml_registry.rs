//! Registry of Service Provider configurations keyed by entity ID.
//!
//! Sessions only carry the SP entity ID; the trust material they are validated
//! against is looked up here at callback time. The registry is an explicit
//! object so tests and embedders can scope it, with [`ServiceProviderRegistry::global`]
//! available as a process-wide default.
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = ServiceProviderRegistry::new();
//! registry.register(config).await;
//!
//! let config = registry.resolve("https://sp.example.com/saml/metadata").await?;
//! ```

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use super::{SamlError, sp_config::ServiceProviderConfig};

static GLOBAL_REGISTRY: Lazy<ServiceProviderRegistry> = Lazy::new(ServiceProviderRegistry::new);

/// Registry of SP configurations.
///
/// Cloning is cheap and clones share the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct ServiceProviderRegistry {
    /// Map of entity ID -> config
    providers: Arc<RwLock<HashMap<String, Arc<ServiceProviderConfig>>>>,
}

impl ServiceProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ServiceProviderRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register a configuration under its entity ID.
    ///
    /// If a configuration already exists for this entity ID, it will be replaced.
    pub async fn register(&self, config: ServiceProviderConfig) -> Arc<ServiceProviderConfig> {
        let entity_id = config.entity_id().to_string();
        let config = Arc::new(config);
        let previous = {
            let mut providers = self.providers.write().await;
            providers.insert(entity_id.clone(), config.clone())
        };
        tracing::debug!(
            entity_id = %entity_id,
            replaced = previous.is_some(),
            "Registered SAML service provider"
        );
        config
    }

    /// Get the configuration for an entity ID.
    pub async fn get(&self, entity_id: &str) -> Option<Arc<ServiceProviderConfig>> {
        let providers = self.providers.read().await;
        providers.get(entity_id).cloned()
    }

    /// Get the configuration for an entity ID, failing if it is not registered.
    pub async fn resolve(&self, entity_id: &str) -> Result<Arc<ServiceProviderConfig>, SamlError> {
        self.get(entity_id)
            .await
            .ok_or_else(|| SamlError::UnknownServiceProvider(entity_id.to_string()))
    }

    /// List all registered entity IDs.
    pub async fn entity_ids(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        providers.keys().cloned().collect()
    }

    /// Get the number of registered configurations.
    pub async fn len(&self) -> usize {
        let providers = self.providers.read().await;
        providers.len()
    }

    /// Check if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        let providers = self.providers.read().await;
        providers.is_empty()
    }
}
