// Database Module
// Handles connections per role, query execution, schema metadata and its cache

pub mod cache;
pub mod config;
pub mod connection;
pub mod drivers;
pub mod errors;
pub mod query;
pub mod registry;
pub mod schema;
pub mod session;
pub mod traits;
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::TableCache;
pub use config::{Config, DebugConfig, MinVersion, ServerConfig};
pub use connection::{resolve_connection_params, ConnectionManager, ConnectionParams, ResolvedConnection};
pub use drivers::{DummyDriver, MysqlDriver};
pub use errors::format_error;
pub use query::{backquote, DebugQuery, QueryEngine};
pub use registry::DriverRegistry;
pub use schema::{
    ColumnMapping, ForeignKeyConstraint, MetadataSource, SchemaMetadataManager, SortOrder,
    TableFilter, TableLimit, TableMetadata, TableRecord, TableSelector, TableTypeFilter,
};
pub use session::DatabaseSession;
pub use traits::{
    AssocRow, Connection, ConnectionRole, DatabaseDriver, DatabaseError, DriverError, FieldMeta,
    QueryOptions, ResultSet, Row,
};
pub use version::{version_to_int, ServerFlavor, ServerInfo};
