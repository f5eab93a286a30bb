// Query Execution Engine
// Runs statements on a role's connection, classifies failures and keeps the SQL debug log

use crate::db::config::DebugConfig;
use crate::db::connection::ConnectionManager;
use crate::db::drivers::escape_mysql_string;
use crate::db::traits::{
    AssocRow, ConnectionRole, DatabaseError, QueryOptions, ResultSet,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Quote an identifier with backticks
pub fn backquote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// One executed statement as recorded in debug mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugQuery {
    pub query: String,
    pub role: ConnectionRole,
    pub time_ms: f64,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Statement executor shared by the metadata layer and the session
pub struct QueryEngine {
    connections: Arc<ConnectionManager>,
    debug: DebugConfig,
    debug_log: RwLock<Vec<DebugQuery>>,
    cached_affected_rows: RwLock<HashMap<ConnectionRole, u64>>,
    current_db: RwLock<Option<String>>,
}

impl QueryEngine {
    pub fn new(connections: Arc<ConnectionManager>, debug: DebugConfig) -> Self {
        Self {
            connections,
            debug,
            debug_log: RwLock::new(Vec::new()),
            cached_affected_rows: RwLock::new(HashMap::new()),
            current_db: RwLock::new(None),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    async fn run(
        &self,
        sql: &str,
        role: ConnectionRole,
        options: QueryOptions,
        cache_affected_rows: bool,
    ) -> Result<ResultSet, DatabaseError> {
        let conn = self
            .connections
            .connection(role)
            .await
            .ok_or(DatabaseError::NotConnected(role))?;
        let driver = self.connections.driver();

        let start = Instant::now();
        let result = driver.real_query(conn.as_ref(), sql, options).await;
        let time_ms = start.elapsed().as_secs_f64() * 1000.0;

        if cache_affected_rows {
            let affected = driver.affected_rows(conn.as_ref());
            self.cached_affected_rows.write().await.insert(role, affected);
        }

        let error = result.as_ref().err().map(|e| e.formatted());

        if self.debug.sql {
            self.debug_log.write().await.push(DebugQuery {
                query: sql.to_string(),
                role,
                time_ms,
                error: error.clone(),
                executed_at: Utc::now(),
            });
        }
        if self.debug.sqllog {
            tracing::info!(
                target: "larik_dbi::sql",
                role = %role,
                time_ms,
                rows = result.as_ref().ok().and_then(|r| r.num_rows()),
                error = error.as_deref(),
                "{}",
                sql
            );
        }

        result.map_err(|e| DatabaseError::QueryFailed {
            message: e.formatted(),
            query: sql.to_string(),
        })
    }

    /// Run a statement; `None` when it fails or the role is not connected.
    ///
    /// The failure stays available through [`QueryEngine::get_error`].
    pub async fn try_query(
        &self,
        sql: &str,
        role: ConnectionRole,
        options: QueryOptions,
        cache_affected_rows: bool,
    ) -> Option<ResultSet> {
        match self.run(sql, role, options, cache_affected_rows).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::debug!(role = %role, "Query failed: {}", e);
                None
            }
        }
    }

    /// Run a statement, failing with the classified error message
    pub async fn query(
        &self,
        sql: &str,
        role: ConnectionRole,
        options: QueryOptions,
        cache_affected_rows: bool,
    ) -> Result<ResultSet, DatabaseError> {
        self.run(sql, role, options, cache_affected_rows).await
    }

    /// Classified error of the last statement on a role
    pub async fn get_error(&self, role: ConnectionRole) -> Option<String> {
        let conn = self.connections.connection(role).await?;
        self.connections
            .driver()
            .last_error(conn.as_ref())
            .map(|e| e.formatted())
    }

    /// Rows changed by the last statement; the cached count when `use_cached`
    pub async fn affected_rows(&self, role: ConnectionRole, use_cached: bool) -> u64 {
        if use_cached {
            return self
                .cached_affected_rows
                .read()
                .await
                .get(&role)
                .copied()
                .unwrap_or(0);
        }
        match self.connections.connection(role).await {
            Some(conn) => self.connections.driver().affected_rows(conn.as_ref()),
            None => 0,
        }
    }

    pub async fn insert_id(&self, role: ConnectionRole) -> u64 {
        match self.connections.connection(role).await {
            Some(conn) => self.connections.driver().insert_id(conn.as_ref()),
            None => 0,
        }
    }

    /// Escape text for a quoted literal, using the role's connection when open
    pub async fn escape_string(&self, role: ConnectionRole, text: &str) -> String {
        match self.connections.connection(role).await {
            Some(conn) => self.connections.driver().escape_string(conn.as_ref(), text),
            None => escape_mysql_string(text),
        }
    }

    /// Switch the default database of a role
    pub async fn select_db(&self, db: &str, role: ConnectionRole) -> bool {
        let sql = format!("USE {};", backquote(db));
        if self
            .try_query(&sql, role, QueryOptions::BUFFERED, false)
            .await
            .is_none()
        {
            return false;
        }
        if role == ConnectionRole::User {
            *self.current_db.write().await = Some(db.to_string());
        }
        true
    }

    /// Forget per-connection state of a role after it was reopened or closed
    pub async fn reset_role(&self, role: ConnectionRole) {
        self.cached_affected_rows.write().await.remove(&role);
        if role == ConnectionRole::User {
            *self.current_db.write().await = None;
        }
    }

    /// Database last selected on the user connection
    pub async fn current_db(&self) -> Option<String> {
        self.current_db.read().await.clone()
    }

    /// First column of the first row; `None` on failure, no rows or NULL
    pub async fn fetch_value(&self, sql: &str, role: ConnectionRole) -> Option<String> {
        let mut result = self
            .try_query(sql, role, QueryOptions::BUFFERED, false)
            .await?;
        result.fetch_row()?.into_iter().next().flatten()
    }

    /// First row keyed by column name
    pub async fn fetch_single_row(&self, sql: &str, role: ConnectionRole) -> Option<AssocRow> {
        let mut result = self
            .try_query(sql, role, QueryOptions::BUFFERED, false)
            .await?;
        result.fetch_assoc()
    }

    /// Every row keyed by column name
    pub async fn fetch_rows(
        &self,
        sql: &str,
        role: ConnectionRole,
    ) -> Result<Vec<AssocRow>, DatabaseError> {
        let mut result = self.query(sql, role, QueryOptions::BUFFERED, false).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.fetch_assoc() {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows keyed by the value of `key_column`; later duplicates win
    pub async fn fetch_result(
        &self,
        sql: &str,
        key_column: &str,
        role: ConnectionRole,
    ) -> Result<IndexMap<String, AssocRow>, DatabaseError> {
        let rows = self.fetch_rows(sql, role).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row.get(key_column).cloned().flatten().unwrap_or_default();
                (key, row)
            })
            .collect())
    }

    /// Values of the first column, NULLs skipped
    pub async fn fetch_column(
        &self,
        sql: &str,
        role: ConnectionRole,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut result = self.query(sql, role, QueryOptions::BUFFERED, false).await?;
        let mut values = Vec::new();
        while let Some(row) = result.fetch_row() {
            if let Some(value) = row.into_iter().next().flatten() {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Statements recorded so far, in execution order
    pub async fn debug_queries(&self) -> Vec<DebugQuery> {
        self.debug_log.read().await.clone()
    }

    pub async fn clear_debug_log(&self) {
        self.debug_log.write().await.clear();
    }
}
