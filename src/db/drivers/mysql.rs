// MySQL Driver
// Implements DatabaseDriver for MySQL, MariaDB and Percona using sqlx

use crate::db::connection::ConnectionParams;
use crate::db::drivers::escape_mysql_string;
use crate::db::errors::{
    CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR, CR_SSL_CONNECTION_ERROR, CR_UNKNOWN_ERROR,
};
use crate::db::traits::{
    Connection, DatabaseDriver, DriverError, FieldMeta, QueryOptions, ResultSet, Row,
};
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlRow, MySqlSslMode};
use sqlx::{
    Column, ConnectOptions, Connection as SqlxConnection, Either, Executor, Row as SqlxRow, ValueRef,
};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_PORT: u16 = 3306;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ConnectionState {
    last_error: Option<DriverError>,
    affected_rows: u64,
    insert_id: u64,
}

/// MySQL specific connection wrapper
pub struct MysqlConnection {
    pub id: String,
    conn: tokio::sync::Mutex<sqlx::MySqlConnection>,
    state: Mutex<ConnectionState>,
}

#[async_trait::async_trait]
impl Connection for MysqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        self.conn.lock().await.ping().await.is_ok()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Map a sqlx error onto the server/client error numbers the classifier knows
fn driver_error(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| i32::from(e.number()))
                .unwrap_or(CR_UNKNOWN_ERROR);
            DriverError::new(code, db.message())
        }
        sqlx::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                DriverError::new(CR_CONNECTION_ERROR, io.to_string())
            }
            _ => DriverError::new(CR_CONN_HOST_ERROR, io.to_string()),
        },
        sqlx::Error::Tls(tls) => DriverError::new(CR_SSL_CONNECTION_ERROR, tls.to_string()),
        other => DriverError::new(CR_UNKNOWN_ERROR, other.to_string()),
    }
}

/// Text value of one column; `None` for SQL NULL
fn extract_value(row: &MySqlRow, idx: usize) -> Option<String> {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return None,
        Err(_) => return None,
        _ => {}
    }

    // The text protocol ships every value as its textual form
    if let Ok(v) = row.try_get_unchecked::<String, _>(idx) {
        return Some(v);
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Some(v.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(v) = row.try_get_unchecked::<Vec<u8>, _>(idx) {
        return Some(String::from_utf8_lossy(&v).into_owned());
    }
    None
}

fn convert_row(row: &MySqlRow) -> Row {
    (0..row.columns().len())
        .map(|idx| extract_value(row, idx))
        .collect()
}

fn fields_of(row: &MySqlRow) -> Vec<FieldMeta> {
    // sqlx does not expose the originating table of a column
    row.columns()
        .iter()
        .map(|col| FieldMeta::new(col.name(), None))
        .collect()
}

/// MySQL driver implementation
pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(
        user: &str,
        password: &str,
        params: &ConnectionParams,
    ) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new()
            .host(&params.host)
            .port(if params.port == 0 {
                DEFAULT_PORT
            } else {
                params.port
            })
            .username(user)
            .password(password)
            .ssl_mode(if params.ssl {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });

        if let Some(socket) = params.socket.as_deref() {
            opts = opts.socket(socket);
        }
        if params.compress {
            tracing::debug!("Protocol compression is not supported by the driver, ignoring");
        }

        opts
    }

    fn mysql_connection(conn: &dyn Connection) -> Result<&MysqlConnection, DriverError> {
        conn.as_any()
            .downcast_ref::<MysqlConnection>()
            .ok_or_else(|| {
                DriverError::new(
                    CR_UNKNOWN_ERROR,
                    "Connection does not belong to the MySQL driver",
                )
            })
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MysqlDriver {
    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    async fn connect(
        &self,
        user: &str,
        password: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        let opts = Self::build_connect_options(user, password, params);
        let conn = opts.connect().await.map_err(driver_error)?;

        Ok(Arc::new(MysqlConnection {
            id: uuid::Uuid::new_v4().to_string(),
            conn: tokio::sync::Mutex::new(conn),
            state: Mutex::new(ConnectionState::default()),
        }))
    }

    async fn real_query(
        &self,
        conn: &dyn Connection,
        sql: &str,
        options: QueryOptions,
    ) -> Result<ResultSet, DriverError> {
        let mysql = Self::mysql_connection(conn)?;

        let outcome = {
            let mut guard = mysql.conn.lock().await;
            // raw_sql keeps to the text protocol, which accepts USE, SET NAMES and SHOW
            let collected = (&mut *guard)
                .fetch_many(sqlx::raw_sql(sql))
                .try_collect::<Vec<_>>()
                .await;
            collected
        };

        let items = match outcome {
            Ok(items) => items,
            Err(e) => {
                let error = driver_error(e);
                let mut state = lock(&mysql.state);
                state.last_error = Some(error.clone());
                state.affected_rows = 0;
                return Err(error);
            }
        };

        let mut fields = Vec::new();
        let mut rows = Vec::new();
        let mut affected_rows = 0;
        let mut insert_id = 0;
        for item in items {
            match item {
                Either::Left(done) => {
                    affected_rows += done.rows_affected();
                    if done.last_insert_id() != 0 {
                        insert_id = done.last_insert_id();
                    }
                }
                Either::Right(row) => {
                    if fields.is_empty() {
                        fields = fields_of(&row);
                    }
                    rows.push(convert_row(&row));
                }
            }
        }

        let mut state = lock(&mysql.state);
        state.last_error = None;
        state.affected_rows = if rows.is_empty() {
            affected_rows
        } else {
            rows.len() as u64
        };
        state.insert_id = insert_id;

        Ok(ResultSet::new(fields, rows, options))
    }

    fn escape_string(&self, _conn: &dyn Connection, text: &str) -> String {
        escape_mysql_string(text)
    }

    fn last_error(&self, conn: &dyn Connection) -> Option<DriverError> {
        Self::mysql_connection(conn)
            .ok()
            .and_then(|conn| lock(&conn.state).last_error.clone())
    }

    fn affected_rows(&self, conn: &dyn Connection) -> u64 {
        Self::mysql_connection(conn)
            .map(|conn| lock(&conn.state).affected_rows)
            .unwrap_or(0)
    }

    fn insert_id(&self, conn: &dyn Connection) -> u64 {
        Self::mysql_connection(conn)
            .map(|conn| lock(&conn.state).insert_id)
            .unwrap_or(0)
    }
}
