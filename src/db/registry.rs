// Driver Registry
// Manages available database drivers by name

use crate::db::drivers::{DummyDriver, MysqlDriver};
use crate::db::traits::{DatabaseDriver, DatabaseError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn DatabaseDriver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding the network and the dummy driver
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(MysqlDriver::new())).await;
        registry.register(Arc::new(DummyDriver::new())).await;
        registry
    }

    /// Register a database driver under its name, replacing any previous one
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.driver_name();
        let mut drivers = self.drivers.write().await;
        drivers.insert(name.to_string(), driver);
        tracing::debug!(driver = name, "Registered driver");
    }

    /// Get a driver by name
    pub async fn get_driver(&self, name: &str) -> Result<Arc<dyn DatabaseDriver>, DatabaseError> {
        let drivers = self.drivers.read().await;
        drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::DriverNotFound(name.to_string()))
    }

    /// Names of all registered drivers, sorted
    pub async fn driver_names(&self) -> Vec<String> {
        let drivers = self.drivers.read().await;
        let mut names: Vec<String> = drivers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_driver(&self, name: &str) -> bool {
        let drivers = self.drivers.read().await;
        drivers.contains_key(name)
    }

    /// Remove a driver
    pub async fn unregister(&self, name: &str) {
        let mut drivers = self.drivers.write().await;
        if drivers.remove(name).is_some() {
            tracing::debug!(driver = name, "Unregistered driver");
        }
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
