// Database Driver Traits
// Defines the driver contract every backend implements (network driver, fixture driver)

use crate::db::connection::ConnectionParams;
use crate::db::errors::format_error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Purpose of a connection. Each role owns an independent handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Connection made with the logged-in user's credentials
    User,
    /// Connection made with the control user's credentials
    Control,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::User => "user",
            ConnectionRole::Control => "control",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No {0} connection is open")]
    NotConnected(ConnectionRole),

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("{message}")]
    QueryFailed { message: String, query: String },

    #[error("Table metadata unavailable for database {database}: {message}")]
    MetadataUnavailable { database: String, message: String },

    #[error("Driver does not report the originating table of result columns")]
    FieldMetadataUnavailable,

    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl DatabaseError {
    /// Whether the error came from a failed statement (as opposed to setup problems)
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::QueryFailed { .. } | DatabaseError::MetadataUnavailable { .. }
        )
    }
}

/// Error code and message as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Message suitable for end users
    pub fn formatted(&self) -> String {
        format_error(self.code, &self.message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} - {}", self.code, self.message)
    }
}

/// Bitset of statement execution options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QueryOptions(u8);

impl QueryOptions {
    /// Buffered result, the default
    pub const NONE: Self = Self(0);
    /// Materialize the full result so it can be iterated repeatedly
    pub const BUFFERED: Self = Self(1);
    /// Stream rows once
    pub const UNBUFFERED: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_unbuffered(self) -> bool {
        self.contains(Self::UNBUFFERED)
    }
}

impl BitOr for QueryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Metadata of one result-set column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    /// Table the column originates from, when the driver knows it
    pub table: Option<String>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, table: Option<&str>) -> Self {
        Self {
            name: name.into(),
            table: table.map(str::to_string),
        }
    }
}

/// One row of text-protocol values (`None` is SQL NULL)
pub type Row = Vec<Option<String>>;

/// One row keyed by column name, in column order
pub type AssocRow = IndexMap<String, Option<String>>;

/// Result of a statement
///
/// Buffered sets keep every row and can be rewound. Unbuffered sets hand out
/// each row once and cannot report their length.
#[derive(Debug, Clone)]
pub struct ResultSet {
    fields: Vec<FieldMeta>,
    rows: Vec<Row>,
    position: usize,
    buffered: bool,
}

impl ResultSet {
    pub fn new(fields: Vec<FieldMeta>, rows: Vec<Row>, options: QueryOptions) -> Self {
        Self {
            fields,
            rows,
            position: 0,
            buffered: !options.is_unbuffered(),
        }
    }

    /// Result of a statement that produced no rows
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), QueryOptions::BUFFERED)
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Number of rows, only known for buffered results
    pub fn num_rows(&self) -> Option<usize> {
        self.buffered.then_some(self.rows.len())
    }

    /// Next row, or `None` at the end
    pub fn fetch_row(&mut self) -> Option<Row> {
        if self.position >= self.rows.len() {
            return None;
        }
        let row = if self.buffered {
            self.rows[self.position].clone()
        } else {
            std::mem::take(&mut self.rows[self.position])
        };
        self.position += 1;
        Some(row)
    }

    /// Next row keyed by column name
    pub fn fetch_assoc(&mut self) -> Option<AssocRow> {
        let row = self.fetch_row()?;
        Some(
            self.fields
                .iter()
                .map(|field| field.name.clone())
                .zip(row)
                .collect(),
        )
    }

    /// Move the cursor; fails for unbuffered results and out-of-range positions
    pub fn data_seek(&mut self, position: usize) -> bool {
        if !self.buffered || position > self.rows.len() {
            return false;
        }
        self.position = position;
        true
    }
}

/// Connection trait - all database connections must implement this
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Test if the connection is alive
    async fn is_alive(&self) -> bool;

    /// Allow downcasting for driver-specific operations
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Database driver trait - all database drivers must implement this
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Extension name the driver is registered under
    fn driver_name(&self) -> &'static str;

    // --- Connection Management ---
    /// Open a connection with the given credentials and connection shape
    async fn connect(
        &self,
        user: &str,
        password: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn Connection>, DriverError>;

    // --- Query Execution ---
    /// Run one statement
    async fn real_query(
        &self,
        conn: &dyn Connection,
        sql: &str,
        options: QueryOptions,
    ) -> Result<ResultSet, DriverError>;

    /// Fetch the next row of a result
    fn fetch_row(&self, result: &mut ResultSet) -> Option<Row> {
        result.fetch_row()
    }

    /// Column metadata of a result
    fn fields_meta(&self, result: &ResultSet) -> Vec<FieldMeta> {
        result.fields().to_vec()
    }

    /// Escape a string for use inside a quoted SQL literal
    fn escape_string(&self, conn: &dyn Connection, text: &str) -> String;

    /// Error of the last statement on this connection, if it failed
    fn last_error(&self, conn: &dyn Connection) -> Option<DriverError>;

    /// Rows changed by the last statement on this connection
    fn affected_rows(&self, conn: &dyn Connection) -> u64;

    /// Auto-increment value generated by the last statement on this connection
    fn insert_id(&self, conn: &dyn Connection) -> u64;
}
