//! Plugin-based connector registry
//!
//! Registry connectors are registered at runtime per registry family, so the
//! orchestrator never hard-codes which implementation serves which suffix.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reseller_core::registry::ConnectorRegistry;
//!
//! let connectors = ConnectorRegistry::new();
//! connectors.register_connector("generic", Arc::new(GatewayConnector::new()));
//!
//! let connector = connectors.connector_for(&resolved.family)?;
//! let session = connector.connect(&resolved.session).await?;
//! ```
//!
//! A family without its own connector falls back to the one registered
//! under `generic`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::directory::RegistryFamily;
use crate::error::{Error, Result};
use crate::traits::RegistryConnector;

/// Connector registry keyed by registry family
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn RegistryConnector>>>,
}

impl ConnectorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector for a registry family
    ///
    /// # Parameters
    ///
    /// - `family`: Registry family name (e.g., "generic", "fi")
    /// - `connector`: Connector serving that family
    pub fn register_connector(
        &self,
        family: impl AsRef<str>,
        connector: Arc<dyn RegistryConnector>,
    ) {
        let family = RegistryFamily::new(family);
        let mut connectors = self.connectors.write().unwrap_or_else(|e| e.into_inner());
        connectors.insert(family.as_str().to_string(), connector);
    }

    /// Connector for a family, falling back to the generic one
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn RegistryConnector>)`: The connector to use
    /// - `Err(Error::Configuration)`: If neither the family nor `generic` is registered
    pub fn connector_for(&self, family: &RegistryFamily) -> Result<Arc<dyn RegistryConnector>> {
        let connectors = self.connectors.read().unwrap_or_else(|e| e.into_inner());
        connectors
            .get(family.as_str())
            .or_else(|| connectors.get(RegistryFamily::GENERIC))
            .cloned()
            .ok_or_else(|| {
                Error::config(format!("No registry connector for family '{}'", family))
            })
    }

    /// List all registered families
    pub fn list_families(&self) -> Vec<String> {
        let connectors = self.connectors.read().unwrap_or_else(|e| e.into_inner());
        let mut families: Vec<String> = connectors.keys().cloned().collect();
        families.sort();
        families
    }

    /// Check if a family has its own connector
    pub fn has_connector(&self, family: &str) -> bool {
        let connectors = self.connectors.read().unwrap_or_else(|e| e.into_inner());
        connectors.contains_key(RegistryFamily::new(family).as_str())
    }
}
