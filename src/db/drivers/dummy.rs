// Dummy Driver
// Fixture-backed implementation of the driver contract for tests and offline use

use crate::db::connection::ConnectionParams;
use crate::db::drivers::escape_mysql_string;
use crate::db::errors::CR_UNKNOWN_ERROR;
use crate::db::schema::CATALOG_COLUMNS;
use crate::db::traits::{
    Connection, DatabaseDriver, DriverError, FieldMeta, QueryOptions, ResultSet, Row,
};
use std::sync::{Arc, Mutex, MutexGuard};

const PARSE_ERROR: i32 = 1064;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How a fixture selects the statements it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMatch {
    Exact(String),
    Prefix(String),
    Contains(String),
}

impl QueryMatch {
    pub fn exact(sql: &str) -> Self {
        QueryMatch::Exact(normalize(sql))
    }

    pub fn prefix(sql: &str) -> Self {
        QueryMatch::Prefix(normalize(sql))
    }

    pub fn contains(sql: &str) -> Self {
        QueryMatch::Contains(normalize(sql))
    }

    fn matches(&self, normalized: &str) -> bool {
        match self {
            QueryMatch::Exact(pattern) => normalized == pattern,
            QueryMatch::Prefix(pattern) => normalized.starts_with(pattern.as_str()),
            QueryMatch::Contains(pattern) => normalized.contains(pattern.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Rows {
        fields: Vec<FieldMeta>,
        rows: Vec<Row>,
        affected_rows: Option<u64>,
        insert_id: u64,
    },
    Error(DriverError),
}

#[derive(Debug, Clone)]
struct Fixture {
    pattern: QueryMatch,
    outcome: Outcome,
}

fn text_rows(rows: &[&[Option<&str>]]) -> Vec<Row> {
    rows.iter()
        .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
        .collect()
}

fn rows_fixture(pattern: QueryMatch, columns: &[&str], rows: &[&[Option<&str>]]) -> Fixture {
    Fixture {
        pattern,
        outcome: Outcome::Rows {
            fields: columns.iter().map(|c| FieldMeta::new(*c, None)).collect(),
            rows: text_rows(rows),
            affected_rows: None,
            insert_id: 0,
        },
    }
}

fn command_fixture(pattern: QueryMatch, affected_rows: u64, insert_id: u64) -> Fixture {
    Fixture {
        pattern,
        outcome: Outcome::Rows {
            fields: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected_rows),
            insert_id,
        },
    }
}

const STATUS_COLUMNS: &[&str] = &[
    "Name",
    "Engine",
    "Version",
    "Row_format",
    "Rows",
    "Avg_row_length",
    "Data_length",
    "Max_data_length",
    "Index_length",
    "Data_free",
    "Auto_increment",
    "Create_time",
    "Update_time",
    "Check_time",
    "Collation",
    "Checksum",
    "Create_options",
    "Comment",
];

fn status_row<'a>(
    name: &'a str,
    data_length: &'a str,
    index_length: &'a str,
    create_time: &'a str,
    comment: &'a str,
) -> [Option<&'a str>; 18] {
    [
        Some(name),
        Some("InnoDB"),
        Some("10"),
        Some("Dynamic"),
        Some("0"),
        Some("0"),
        Some(data_length),
        Some("0"),
        Some(index_length),
        Some("0"),
        None,
        Some(create_time),
        None,
        None,
        Some("utf8mb4_0900_ai_ci"),
        None,
        Some(""),
        Some(comment),
    ]
}

fn view_status_row(name: &str) -> [Option<&str>; 18] {
    let mut row = [None; 18];
    row[0] = Some(name);
    row[17] = Some("VIEW");
    row
}

/// Canned answers for the statements the access layer issues
fn default_fixtures() -> Vec<Fixture> {
    let catalog_fks: [Option<&str>; 21] = [
        Some("def"),
        Some("test"),
        Some("fks"),
        Some("BASE TABLE"),
        Some("InnoDB"),
        Some("10"),
        Some("Dynamic"),
        Some("0"),
        Some("0"),
        Some("16384"),
        Some("0"),
        Some("16384"),
        Some("0"),
        None,
        Some("11/7/2018 10:57"),
        None,
        None,
        Some("utf8mb4_0900_ai_ci"),
        None,
        Some(""),
        Some(""),
    ];
    let catalog_table1: [Option<&str>; 21] = [
        Some("def"),
        Some("test"),
        Some("table1"),
        Some("BASE TABLE"),
        Some("InnoDB"),
        Some("10"),
        Some("Dynamic"),
        Some("0"),
        Some("0"),
        Some("16384"),
        Some("0"),
        Some("0"),
        Some("0"),
        None,
        Some("10/16/2018 18:33"),
        None,
        None,
        Some("utf8mb4_0900_ai_ci"),
        None,
        Some(""),
        Some("table 1"),
    ];

    let fks = status_row("fks", "16384", "16384", "11/7/2018 10:57", "");
    let table1 = status_row("table1", "16384", "0", "10/16/2018 18:33", "table 1");

    let shop = status_row("shop", "100", "0", "1/2/2019 09:00", "");
    let shop_items = status_row("shop_items", "5000", "1000", "1/2/2019 09:00", "");
    let shop_orders = status_row("shop_orders", "2000", "0", "1/2/2019 09:00", "");
    let shop_view = view_status_row("shop_view");
    let other = status_row("other", "300", "0", "1/2/2019 09:00", "");

    vec![
        rows_fixture(
            QueryMatch::exact("SELECT CURRENT_USER();"),
            &["CURRENT_USER()"],
            &[&[Some("app_test@localhost")]],
        ),
        rows_fixture(
            QueryMatch::exact("SELECT @@version, @@version_comment"),
            &["@@version", "@@version_comment"],
            &[&[Some("8.0.1"), Some("MySQL Community Server (GPL)")]],
        ),
        rows_fixture(
            QueryMatch::exact("SELECT @@basedir"),
            &["@@basedir"],
            &[&[Some("/usr/")]],
        ),
        rows_fixture(
            QueryMatch::exact("SELECT @@collation_server"),
            &["@@collation_server"],
            &[&[Some("utf8_general_ci")]],
        ),
        rows_fixture(
            QueryMatch::exact("SELECT @@collation_database"),
            &["@@collation_database"],
            &[&[Some("utf8_general_ci")]],
        ),
        rows_fixture(
            QueryMatch::exact(
                "SELECT DEFAULT_COLLATION_NAME FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME = 'app_test' LIMIT 1",
            ),
            &["DEFAULT_COLLATION_NAME"],
            &[&[Some("utf8_general_ci")]],
        ),
        rows_fixture(QueryMatch::exact("SELECT 1"), &["1"], &[&[Some("1")]]),
        rows_fixture(
            QueryMatch::exact("SHOW DATABASES"),
            &["Database"],
            &[
                &[Some("information_schema")],
                &[Some("mysql")],
                &[Some("app_test")],
                &[Some("shop")],
                &[Some("test")],
            ],
        ),
        rows_fixture(
            QueryMatch::exact("SHOW TABLES FROM `test`;"),
            &["Tables_in_test"],
            &[&[Some("fks")], &[Some("table1")], &[Some("table2")]],
        ),
        rows_fixture(
            QueryMatch::contains(
                "FROM `information_schema`.`TABLES` t WHERE `TABLE_SCHEMA` IN ('test')",
            ),
            CATALOG_COLUMNS,
            &[&catalog_fks, &catalog_table1],
        ),
        rows_fixture(
            QueryMatch::prefix("SHOW TABLE STATUS FROM `test`"),
            STATUS_COLUMNS,
            &[&fks, &table1],
        ),
        rows_fixture(
            QueryMatch::prefix("SHOW TABLE STATUS FROM `shop`"),
            STATUS_COLUMNS,
            &[&shop, &shop_items, &shop_orders, &shop_view, &other],
        ),
        rows_fixture(
            QueryMatch::contains(
                "FROM information_schema.key_column_usage WHERE referenced_table_name IS NOT NULL \
                 AND TABLE_SCHEMA = 'test'",
            ),
            &[
                "TABLE_NAME",
                "COLUMN_NAME",
                "REFERENCED_TABLE_NAME",
                "REFERENCED_COLUMN_NAME",
            ],
            &[&[
                Some("table2"),
                Some("idtable2"),
                Some("table1"),
                Some("idtable1"),
            ]],
        ),
        command_fixture(QueryMatch::prefix("SET "), 0, 0),
        command_fixture(QueryMatch::prefix("USE "), 0, 0),
        command_fixture(QueryMatch::prefix("UPDATE "), 5, 0),
        command_fixture(QueryMatch::prefix("INSERT "), 1, 42),
    ]
}

#[derive(Debug, Default)]
struct ConnectionState {
    last_error: Option<DriverError>,
    affected_rows: u64,
    insert_id: u64,
}

/// Connection handed out by the dummy driver
pub struct DummyConnection {
    id: String,
    state: Mutex<ConnectionState>,
}

impl DummyConnection {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(ConnectionState::default()),
        }
    }
}

#[async_trait::async_trait]
impl Connection for DummyConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Driver that answers statements from registered fixtures.
///
/// Fixtures registered with the `set_*` methods take precedence over the
/// built-in ones; the most recently registered wins. Statements are matched
/// after collapsing whitespace. Anything unmatched fails with a parse error.
pub struct DummyDriver {
    fixtures: Mutex<Vec<Fixture>>,
    defaults: Vec<Fixture>,
    connect_error: Mutex<Option<DriverError>>,
    executed: Mutex<Vec<String>>,
}

impl DummyDriver {
    pub fn new() -> Self {
        Self {
            fixtures: Mutex::new(Vec::new()),
            defaults: default_fixtures(),
            connect_error: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Answer matching statements with text rows
    pub fn set_rows(&self, pattern: QueryMatch, columns: &[&str], rows: &[&[Option<&str>]]) {
        lock(&self.fixtures).push(rows_fixture(pattern, columns, rows));
    }

    /// Answer matching statements with rows and explicit column metadata
    pub fn set_result(&self, pattern: QueryMatch, fields: Vec<FieldMeta>, rows: Vec<Row>) {
        lock(&self.fixtures).push(Fixture {
            pattern,
            outcome: Outcome::Rows {
                fields,
                rows,
                affected_rows: None,
                insert_id: 0,
            },
        });
    }

    /// Answer matching statements with a row count and no result rows
    pub fn set_affected(&self, pattern: QueryMatch, affected_rows: u64, insert_id: u64) {
        lock(&self.fixtures).push(command_fixture(pattern, affected_rows, insert_id));
    }

    /// Fail matching statements
    pub fn set_error(&self, pattern: QueryMatch, error: DriverError) {
        lock(&self.fixtures).push(Fixture {
            pattern,
            outcome: Outcome::Error(error),
        });
    }

    /// Make every following connect fail (or succeed again with `None`)
    pub fn set_connect_error(&self, error: Option<DriverError>) {
        *lock(&self.connect_error) = error;
    }

    /// Statements run so far, in order, as received
    pub fn executed_queries(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    fn find(&self, sql: &str) -> Option<Outcome> {
        let normalized = normalize(sql);
        let fixtures = lock(&self.fixtures);
        fixtures
            .iter()
            .rev()
            .chain(self.defaults.iter())
            .find(|fixture| fixture.pattern.matches(&normalized))
            .map(|fixture| fixture.outcome.clone())
    }
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn dummy_connection(conn: &dyn Connection) -> Result<&DummyConnection, DriverError> {
    conn.as_any()
        .downcast_ref::<DummyConnection>()
        .ok_or_else(|| DriverError::new(CR_UNKNOWN_ERROR, "Connection does not belong to the dummy driver"))
}

#[async_trait::async_trait]
impl DatabaseDriver for DummyDriver {
    fn driver_name(&self) -> &'static str {
        "dummy"
    }

    async fn connect(
        &self,
        user: &str,
        _password: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        if let Some(error) = lock(&self.connect_error).clone() {
            return Err(error);
        }
        tracing::debug!(user, host = %params.host, "Dummy connection opened");
        Ok(Arc::new(DummyConnection::new()))
    }

    async fn real_query(
        &self,
        conn: &dyn Connection,
        sql: &str,
        options: QueryOptions,
    ) -> Result<ResultSet, DriverError> {
        let conn = dummy_connection(conn)?;
        lock(&self.executed).push(sql.to_string());

        let outcome = self.find(sql).unwrap_or_else(|| {
            Outcome::Error(DriverError::new(
                PARSE_ERROR,
                format!("Not supported query: {}", sql),
            ))
        });

        let mut state = lock(&conn.state);
        match outcome {
            Outcome::Rows {
                fields,
                rows,
                affected_rows,
                insert_id,
            } => {
                state.last_error = None;
                state.affected_rows = affected_rows.unwrap_or(rows.len() as u64);
                state.insert_id = insert_id;
                Ok(ResultSet::new(fields, rows, options))
            }
            Outcome::Error(error) => {
                state.last_error = Some(error.clone());
                state.affected_rows = 0;
                Err(error)
            }
        }
    }

    fn escape_string(&self, _conn: &dyn Connection, text: &str) -> String {
        escape_mysql_string(text)
    }

    fn last_error(&self, conn: &dyn Connection) -> Option<DriverError> {
        dummy_connection(conn)
            .ok()
            .and_then(|conn| lock(&conn.state).last_error.clone())
    }

    fn affected_rows(&self, conn: &dyn Connection) -> u64 {
        dummy_connection(conn)
            .map(|conn| lock(&conn.state).affected_rows)
            .unwrap_or(0)
    }

    fn insert_id(&self, conn: &dyn Connection) -> u64 {
        dummy_connection(conn)
            .map(|conn| lock(&conn.state).insert_id)
            .unwrap_or(0)
    }
}
