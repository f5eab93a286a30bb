// Database access layer for MySQL-family servers
// Resolves connections per role, runs statements and serves cached schema metadata

pub mod db;

pub use db::{
    Config, ConnectionRole, DatabaseDriver, DatabaseError, DatabaseSession, DriverRegistry,
    DummyDriver, MysqlDriver, QueryOptions, ServerConfig, TableFilter, TableMetadata,
};
