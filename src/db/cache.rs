// Table Metadata Cache
// Session-scoped store of table records, filled by table listings and cleared explicitly

use crate::db::schema::TableMetadata;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cached tables per database, in listing order
pub struct TableCache {
    entries: RwLock<HashMap<String, IndexMap<String, TableMetadata>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Write tables of one database, overwriting same-named entries.
    /// Tables missing from `tables` keep their cached record.
    pub async fn store(&self, database: &str, tables: &IndexMap<String, TableMetadata>) {
        let mut entries = self.entries.write().await;
        let cached = entries.entry(database.to_string()).or_default();
        for (name, table) in tables {
            cached.insert(name.clone(), table.clone());
        }
        tracing::debug!(database, tables = tables.len(), "Table cache updated");
    }

    /// Union of the cached tables of the given databases
    pub async fn get_cached(&self, databases: &[&str]) -> IndexMap<String, TableMetadata> {
        let entries = self.entries.read().await;
        let mut result = IndexMap::new();
        for database in databases {
            if let Some(tables) = entries.get(*database) {
                for (name, table) in tables {
                    result.insert(name.clone(), table.clone());
                }
            }
        }
        result
    }

    pub async fn get_cached_table(&self, database: &str, table: &str) -> Option<TableMetadata> {
        let entries = self.entries.read().await;
        entries.get(database).and_then(|tables| tables.get(table)).cloned()
    }

    /// Drop the given databases, or everything with `None`
    pub async fn clear(&self, databases: Option<&[&str]>) {
        let mut entries = self.entries.write().await;
        match databases {
            Some(databases) => {
                for database in databases {
                    entries.remove(*database);
                }
            }
            None => entries.clear(),
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.values().all(IndexMap::is_empty)
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new()
    }
}
