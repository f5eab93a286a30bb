// Schema Metadata Fetching
// Reads table, foreign key and collation metadata from information_schema or the legacy SHOW commands

use crate::db::cache::TableCache;
use crate::db::config::Config;
use crate::db::drivers::escape_mysql_wildcards;
use crate::db::query::{backquote, QueryEngine};
use crate::db::traits::{AssocRow, ConnectionRole, DatabaseError, QueryOptions};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Collation reported when nothing better is known
pub const DEFAULT_COLLATION: &str = "utf8_general_ci";

/// Columns of `information_schema.TABLES`, in record order
pub const CATALOG_COLUMNS: &[&str] = &[
    "TABLE_CATALOG",
    "TABLE_SCHEMA",
    "TABLE_NAME",
    "TABLE_TYPE",
    "ENGINE",
    "VERSION",
    "ROW_FORMAT",
    "TABLE_ROWS",
    "AVG_ROW_LENGTH",
    "DATA_LENGTH",
    "MAX_DATA_LENGTH",
    "INDEX_LENGTH",
    "DATA_FREE",
    "AUTO_INCREMENT",
    "CREATE_TIME",
    "UPDATE_TIME",
    "CHECK_TIME",
    "TABLE_COLLATION",
    "CHECKSUM",
    "CREATE_OPTIONS",
    "TABLE_COMMENT",
];

/// Legacy alias and the catalog column it mirrors, in record order
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("Db", "TABLE_SCHEMA"),
    ("Name", "TABLE_NAME"),
    ("Engine", "ENGINE"),
    ("Type", "ENGINE"),
    ("Version", "VERSION"),
    ("Row_format", "ROW_FORMAT"),
    ("Rows", "TABLE_ROWS"),
    ("Avg_row_length", "AVG_ROW_LENGTH"),
    ("Data_length", "DATA_LENGTH"),
    ("Max_data_length", "MAX_DATA_LENGTH"),
    ("Index_length", "INDEX_LENGTH"),
    ("Data_free", "DATA_FREE"),
    ("Auto_increment", "AUTO_INCREMENT"),
    ("Create_time", "CREATE_TIME"),
    ("Update_time", "UPDATE_TIME"),
    ("Check_time", "CHECK_TIME"),
    ("Collation", "TABLE_COLLATION"),
    ("Checksum", "CHECKSUM"),
    ("Create_options", "CREATE_OPTIONS"),
    ("Comment", "TABLE_COMMENT"),
];

/// Record with both key families: catalog columns, then legacy aliases
pub type TableRecord = IndexMap<String, Option<String>>;

fn text(row: &AssocRow, key: &str) -> Option<String> {
    row.get(key).cloned().flatten()
}

fn number(row: &AssocRow, key: &str) -> Option<u64> {
    text(row, key).and_then(|v| v.trim().parse().ok())
}

/// Metadata of one table or view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub table_type: String,
    pub engine: Option<String>,
    pub version: Option<String>,
    pub row_format: Option<String>,
    pub rows: Option<u64>,
    pub avg_row_length: Option<u64>,
    pub data_length: Option<u64>,
    pub max_data_length: Option<u64>,
    pub index_length: Option<u64>,
    pub data_free: Option<u64>,
    pub auto_increment: Option<u64>,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
    pub check_time: Option<String>,
    pub collation: Option<String>,
    pub checksum: Option<String>,
    pub create_options: Option<String>,
    pub comment: Option<String>,
}

impl TableMetadata {
    /// Build from a row of `information_schema.TABLES`
    pub fn from_catalog_row(row: &AssocRow) -> Self {
        Self {
            catalog: text(row, "TABLE_CATALOG").unwrap_or_else(|| "def".to_string()),
            schema: text(row, "TABLE_SCHEMA").unwrap_or_default(),
            name: text(row, "TABLE_NAME").unwrap_or_default(),
            table_type: text(row, "TABLE_TYPE").unwrap_or_default(),
            engine: text(row, "ENGINE"),
            version: text(row, "VERSION"),
            row_format: text(row, "ROW_FORMAT"),
            rows: number(row, "TABLE_ROWS"),
            avg_row_length: number(row, "AVG_ROW_LENGTH"),
            data_length: number(row, "DATA_LENGTH"),
            max_data_length: number(row, "MAX_DATA_LENGTH"),
            index_length: number(row, "INDEX_LENGTH"),
            data_free: number(row, "DATA_FREE"),
            auto_increment: number(row, "AUTO_INCREMENT"),
            create_time: text(row, "CREATE_TIME"),
            update_time: text(row, "UPDATE_TIME"),
            check_time: text(row, "CHECK_TIME"),
            collation: text(row, "TABLE_COLLATION"),
            checksum: text(row, "CHECKSUM"),
            create_options: text(row, "CREATE_OPTIONS"),
            comment: text(row, "TABLE_COMMENT"),
        }
    }

    /// Build from a row of `SHOW TABLE STATUS`, which has no catalog or type column
    pub fn from_legacy_row(database: &str, row: &AssocRow) -> Self {
        let engine = text(row, "Engine");
        let comment = text(row, "Comment");

        let is_view = engine.is_none()
            && comment
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case("VIEW"));
        let table_type = if is_view {
            "VIEW"
        } else if database.eq_ignore_ascii_case("information_schema") {
            "SYSTEM VIEW"
        } else {
            "BASE TABLE"
        };

        Self {
            catalog: "def".to_string(),
            schema: database.to_string(),
            name: text(row, "Name").unwrap_or_default(),
            table_type: table_type.to_string(),
            engine,
            version: text(row, "Version"),
            row_format: text(row, "Row_format"),
            rows: number(row, "Rows"),
            avg_row_length: number(row, "Avg_row_length"),
            data_length: number(row, "Data_length"),
            max_data_length: number(row, "Max_data_length"),
            index_length: number(row, "Index_length"),
            data_free: number(row, "Data_free"),
            auto_increment: number(row, "Auto_increment"),
            create_time: text(row, "Create_time"),
            update_time: text(row, "Update_time"),
            check_time: text(row, "Check_time"),
            collation: text(row, "Collation"),
            checksum: text(row, "Checksum"),
            create_options: text(row, "Create_options"),
            comment,
        }
    }

    /// Value of a catalog column or legacy alias as text
    pub fn value(&self, key: &str) -> Option<String> {
        let column = LEGACY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, column)| *column)
            .unwrap_or(key);

        let num = |v: Option<u64>| v.map(|n| n.to_string());
        match column {
            "TABLE_CATALOG" => Some(self.catalog.clone()),
            "TABLE_SCHEMA" => Some(self.schema.clone()),
            "TABLE_NAME" => Some(self.name.clone()),
            "TABLE_TYPE" => Some(self.table_type.clone()),
            "ENGINE" => self.engine.clone(),
            "VERSION" => self.version.clone(),
            "ROW_FORMAT" => self.row_format.clone(),
            "TABLE_ROWS" => num(self.rows),
            "AVG_ROW_LENGTH" => num(self.avg_row_length),
            "DATA_LENGTH" => num(self.data_length),
            "MAX_DATA_LENGTH" => num(self.max_data_length),
            "INDEX_LENGTH" => num(self.index_length),
            "DATA_FREE" => num(self.data_free),
            "AUTO_INCREMENT" => num(self.auto_increment),
            "CREATE_TIME" => self.create_time.clone(),
            "UPDATE_TIME" => self.update_time.clone(),
            "CHECK_TIME" => self.check_time.clone(),
            "TABLE_COLLATION" => self.collation.clone(),
            "CHECKSUM" => self.checksum.clone(),
            "CREATE_OPTIONS" => self.create_options.clone(),
            "TABLE_COMMENT" => self.comment.clone(),
            _ => None,
        }
    }

    /// Mapping with the catalog keys followed by the legacy aliases
    pub fn to_record(&self) -> TableRecord {
        CATALOG_COLUMNS
            .iter()
            .chain(LEGACY_ALIASES.iter().map(|(alias, _)| alias))
            .map(|key| (key.to_string(), self.value(key)))
            .collect()
    }

    /// Data plus index size, the "Size" shown in table listings
    pub fn total_size(&self) -> u64 {
        self.data_length.unwrap_or(0) + self.index_length.unwrap_or(0)
    }

    pub fn is_view(&self) -> bool {
        self.table_type != "BASE TABLE"
    }
}

/// Records of a listing keyed by table name
pub fn to_records(tables: &IndexMap<String, TableMetadata>) -> IndexMap<String, TableRecord> {
    tables
        .iter()
        .map(|(name, table)| (name.clone(), table.to_record()))
        .collect()
}

/// Which tables a listing covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableSelector {
    #[default]
    All,
    /// One table by exact name
    Exact(String),
    /// Tables whose name starts with the prefix, the prefix itself excluded
    Group(String),
    /// Tables named in the list
    List(Vec<String>),
}

impl TableSelector {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            TableSelector::All => true,
            TableSelector::Exact(table) => name == table,
            TableSelector::Group(prefix) => name.starts_with(prefix.as_str()) && name != prefix,
            TableSelector::List(tables) => tables.iter().any(|t| t == name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableTypeFilter {
    /// Base tables only
    Table,
    /// Everything that is not a base table
    View,
}

impl TableTypeFilter {
    pub fn matches(&self, table: &TableMetadata) -> bool {
        match self {
            TableTypeFilter::Table => !table.is_view(),
            TableTypeFilter::View => table.is_view(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableLimit {
    #[default]
    None,
    /// `MaxTableList` tables
    Default,
    Count(usize),
}

impl TableLimit {
    fn resolve(self, max_table_list: usize) -> Option<usize> {
        match self {
            TableLimit::None => None,
            TableLimit::Default => Some(max_table_list),
            TableLimit::Count(n) => Some(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Options of a table listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    pub table: TableSelector,
    pub offset: usize,
    pub limit: TableLimit,
    /// Catalog column or legacy alias to sort on
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub table_type: Option<TableTypeFilter>,
}

impl Default for TableFilter {
    fn default() -> Self {
        Self {
            table: TableSelector::All,
            offset: 0,
            limit: TableLimit::None,
            sort_by: "Name".to_string(),
            sort_order: SortOrder::Asc,
            table_type: None,
        }
    }
}

/// Where table listings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// `information_schema.TABLES`
    Catalog,
    /// `SHOW TABLE STATUS`
    Legacy,
}

impl MetadataSource {
    pub fn select(disable_is: bool) -> Self {
        if disable_is {
            MetadataSource::Legacy
        } else {
            MetadataSource::Catalog
        }
    }
}

/// `AND ...` fragment restricting a catalog query on `TABLES t`.
/// Names in `selector` must already be escaped.
pub fn table_condition(selector: &TableSelector, table_type: Option<TableTypeFilter>) -> String {
    let mut parts = Vec::new();
    match selector {
        TableSelector::All => {}
        TableSelector::Exact(table) => parts.push(format!("t.`TABLE_NAME` = '{}'", table)),
        TableSelector::Group(prefix) => parts.push(format!(
            "t.`TABLE_NAME` LIKE '{}%' AND t.`TABLE_NAME` != '{}'",
            escape_mysql_wildcards(prefix),
            prefix
        )),
        TableSelector::List(tables) => {
            parts.push(format!("t.`TABLE_NAME` IN ('{}')", tables.join("', '")))
        }
    }
    match table_type {
        Some(TableTypeFilter::View) => parts.push("t.`TABLE_TYPE` != 'BASE TABLE'".to_string()),
        Some(TableTypeFilter::Table) => parts.push("t.`TABLE_TYPE` = 'BASE TABLE'".to_string()),
        None => {}
    }
    parts
        .iter()
        .map(|part| format!("AND {}", part))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Catalog column for a sort key; unknown keys sort by name
pub fn catalog_sort_column(sort_by: &str) -> &'static str {
    if let Some((_, column)) = LEGACY_ALIASES.iter().find(|(alias, _)| *alias == sort_by) {
        return *column;
    }
    CATALOG_COLUMNS
        .iter()
        .find(|column| column.eq_ignore_ascii_case(sort_by))
        .copied()
        .unwrap_or("TABLE_NAME")
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Case-insensitive comparison treating digit runs as numbers (`t2` < `t10`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_digits = take_digits(&mut left);
                let r_digits = take_digits(&mut right);
                let l_num = l_digits.trim_start_matches('0');
                let r_num = r_digits.trim_start_matches('0');
                let ordering = l_num
                    .len()
                    .cmp(&r_num.len())
                    .then_with(|| l_num.cmp(r_num));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn compare_values(a: Option<String>, b: Option<String>) -> Ordering {
    let a = a.unwrap_or_default();
    let b = b.unwrap_or_default();
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(&b),
    }
}

/// Client-side ordering of a listing.
///
/// Natural name order and size order apply to both sources. Other columns
/// are only sorted here for the legacy source, which cannot sort server-side.
fn sort_tables(
    tables: &mut [TableMetadata],
    sort_by: &str,
    order: SortOrder,
    natural_order: bool,
    source: MetadataSource,
) {
    if sort_by == "Name" && natural_order {
        tables.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        if order == SortOrder::Desc {
            tables.reverse();
        }
    } else if sort_by == "Data_length" {
        tables.sort_by_key(TableMetadata::total_size);
        if order == SortOrder::Desc {
            tables.reverse();
        }
    } else if source == MetadataSource::Legacy {
        tables.sort_by(|a, b| {
            let by_value = compare_values(a.value(sort_by), b.value(sort_by));
            let by_value = match order {
                SortOrder::Asc => by_value,
                SortOrder::Desc => by_value.reverse(),
            };
            by_value.then_with(|| a.name.cmp(&b.name))
        });
    }
}

/// Foreign key column pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    pub table_name: String,
    pub column_name: String,
    pub referenced_table_name: String,
    pub referenced_column_name: String,
}

/// Origin of one result column of a view definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub table_name: String,
    pub referring_column: String,
    pub real_column: Option<String>,
}

/// Schema metadata manager: table listings with caching, keys and collations
pub struct SchemaMetadataManager {
    engine: Arc<QueryEngine>,
    cache: Arc<TableCache>,
    disable_is: bool,
    max_table_list: usize,
    natural_order: bool,
}

impl SchemaMetadataManager {
    pub fn new(engine: Arc<QueryEngine>, cache: Arc<TableCache>, config: &Config) -> Self {
        Self {
            engine,
            cache,
            disable_is: config.server.disable_is,
            max_table_list: config.max_table_list,
            natural_order: config.natural_order,
        }
    }

    pub fn source(&self) -> MetadataSource {
        MetadataSource::select(self.disable_is)
    }

    async fn escape(&self, role: ConnectionRole, text: &str) -> String {
        self.engine.escape_string(role, text).await
    }

    async fn escape_selector(&self, selector: &TableSelector, role: ConnectionRole) -> TableSelector {
        match selector {
            TableSelector::All => TableSelector::All,
            TableSelector::Exact(table) => TableSelector::Exact(self.escape(role, table).await),
            TableSelector::Group(prefix) => TableSelector::Group(self.escape(role, prefix).await),
            TableSelector::List(tables) => {
                let mut escaped = Vec::with_capacity(tables.len());
                for table in tables {
                    escaped.push(self.escape(role, table).await);
                }
                TableSelector::List(escaped)
            }
        }
    }

    /// List tables of a database with their metadata.
    ///
    /// Reads `information_schema` unless `DisableIS` is set. When the catalog
    /// query fails or returns nothing, `SHOW TABLE STATUS` is used instead.
    /// Every returned table is written to the table cache.
    pub async fn get_tables_full(
        &self,
        database: &str,
        filter: &TableFilter,
        role: ConnectionRole,
    ) -> Result<IndexMap<String, TableMetadata>, DatabaseError> {
        let unavailable = |e: DatabaseError| DatabaseError::MetadataUnavailable {
            database: database.to_string(),
            message: e.to_string(),
        };

        let tables = match self.source() {
            MetadataSource::Catalog => match self.fetch_catalog(database, filter, role).await {
                Ok(tables) if !tables.is_empty() => tables,
                Ok(_) => {
                    tracing::debug!(database, "Catalog returned no tables, trying SHOW TABLE STATUS");
                    self.fetch_legacy(database, filter, role)
                        .await
                        .unwrap_or_default()
                }
                Err(e) => {
                    tracing::warn!(database, "Catalog table listing failed: {}", e);
                    self.fetch_legacy(database, filter, role)
                        .await
                        .map_err(unavailable)?
                }
            },
            MetadataSource::Legacy => self
                .fetch_legacy(database, filter, role)
                .await
                .map_err(unavailable)?,
        };

        let tables: IndexMap<String, TableMetadata> = tables
            .into_iter()
            .map(|table| (table.name.clone(), table))
            .collect();
        self.cache.store(database, &tables).await;
        Ok(tables)
    }

    async fn fetch_catalog(
        &self,
        database: &str,
        filter: &TableFilter,
        role: ConnectionRole,
    ) -> Result<Vec<TableMetadata>, DatabaseError> {
        let selector = self.escape_selector(&filter.table, role).await;
        let condition = table_condition(&selector, filter.table_type);

        let mut sql = format!(
            "SELECT * FROM `information_schema`.`TABLES` t WHERE `TABLE_SCHEMA` IN ('{}')",
            self.escape(role, database).await
        );
        if !condition.is_empty() {
            sql.push(' ');
            sql.push_str(&condition);
        }
        sql.push_str(&format!(
            " ORDER BY {} {}",
            backquote(catalog_sort_column(&filter.sort_by)),
            filter.sort_order.as_sql()
        ));
        if let Some(limit) = filter.limit.resolve(self.max_table_list) {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, filter.offset));
        }

        let rows = self.engine.fetch_rows(&sql, role).await?;
        let mut tables: Vec<TableMetadata> =
            rows.iter().map(TableMetadata::from_catalog_row).collect();
        sort_tables(
            &mut tables,
            &filter.sort_by,
            filter.sort_order,
            self.natural_order,
            MetadataSource::Catalog,
        );
        Ok(tables)
    }

    async fn fetch_legacy(
        &self,
        database: &str,
        filter: &TableFilter,
        role: ConnectionRole,
    ) -> Result<Vec<TableMetadata>, DatabaseError> {
        let mut conditions = Vec::new();
        match &filter.table {
            TableSelector::All => {}
            TableSelector::Exact(table) | TableSelector::Group(table) => {
                let escaped = self.escape(role, table).await;
                conditions.push(format!("`Name` LIKE '{}%'", escape_mysql_wildcards(&escaped)));
            }
            TableSelector::List(tables) => {
                let mut escaped = Vec::with_capacity(tables.len());
                for table in tables {
                    escaped.push(self.escape(role, table).await);
                }
                conditions.push(format!("`Name` IN ('{}')", escaped.join("', '")));
            }
        }
        match filter.table_type {
            Some(TableTypeFilter::View) => conditions.push("`Comment` = 'VIEW'".to_string()),
            Some(TableTypeFilter::Table) => conditions.push("`Comment` != 'VIEW'".to_string()),
            None => {}
        }

        let mut sql = format!("SHOW TABLE STATUS FROM {}", backquote(database));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let rows = self.engine.fetch_rows(&sql, role).await?;
        let mut tables: Vec<TableMetadata> = rows
            .iter()
            .map(|row| TableMetadata::from_legacy_row(database, row))
            .filter(|table| filter.table.matches(&table.name))
            .filter(|table| filter.table_type.map_or(true, |t| t.matches(table)))
            .collect();

        sort_tables(
            &mut tables,
            &filter.sort_by,
            filter.sort_order,
            self.natural_order,
            MetadataSource::Legacy,
        );

        let tables = match filter.limit.resolve(self.max_table_list) {
            Some(limit) => tables.into_iter().skip(filter.offset).take(limit).collect(),
            None => tables,
        };
        Ok(tables)
    }

    /// Table names of a database; empty when the listing fails
    pub async fn get_tables(&self, database: &str, role: ConnectionRole) -> Vec<String> {
        let sql = format!("SHOW TABLES FROM {};", backquote(database));
        match self.engine.fetch_column(&sql, role).await {
            Ok(tables) => tables,
            Err(e) => {
                tracing::debug!(database, "Table name listing failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Foreign keys among `tables`, in catalog order; empty when the lookup fails
    pub async fn get_foreign_key_constraints(
        &self,
        database: &str,
        tables: &[&str],
        role: ConnectionRole,
    ) -> Vec<ForeignKeyConstraint> {
        if tables.is_empty() {
            return Vec::new();
        }

        let mut escaped = Vec::with_capacity(tables.len());
        for table in tables {
            escaped.push(format!("'{}'", self.escape(role, table).await));
        }
        let table_list = escaped.join(", ");

        let sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
             FROM information_schema.key_column_usage \
             WHERE referenced_table_name IS NOT NULL \
             AND TABLE_SCHEMA = '{}' \
             AND TABLE_NAME IN ({}) \
             AND REFERENCED_TABLE_NAME IN ({});",
            self.escape(role, database).await,
            table_list,
            table_list
        );

        match self.engine.fetch_rows(&sql, role).await {
            Ok(rows) => rows
                .iter()
                .map(|row| ForeignKeyConstraint {
                    table_name: text(row, "TABLE_NAME").unwrap_or_default(),
                    column_name: text(row, "COLUMN_NAME").unwrap_or_default(),
                    referenced_table_name: text(row, "REFERENCED_TABLE_NAME").unwrap_or_default(),
                    referenced_column_name: text(row, "REFERENCED_COLUMN_NAME")
                        .unwrap_or_default(),
                })
                .collect(),
            Err(e) => {
                tracing::debug!(database, "Foreign key lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Map each result column of `sql` to its source table and the view column
    /// at the same position
    pub async fn get_column_map_from_sql(
        &self,
        sql: &str,
        view_columns: &[&str],
        role: ConnectionRole,
    ) -> Result<Vec<ColumnMapping>, DatabaseError> {
        let Some(result) = self
            .engine
            .try_query(sql, role, QueryOptions::BUFFERED, false)
            .await
        else {
            return Ok(Vec::new());
        };

        let fields = self.engine.connections().driver().fields_meta(&result);
        if !fields.is_empty() && fields.iter().all(|field| field.table.is_none()) {
            return Err(DatabaseError::FieldMetadataUnavailable);
        }

        Ok(fields
            .into_iter()
            .enumerate()
            .map(|(i, field)| ColumnMapping {
                table_name: field.table.unwrap_or_default(),
                referring_column: field.name,
                real_column: view_columns.get(i).map(|c| c.to_string()),
            })
            .collect())
    }

    /// Whether a database holds server metadata rather than user data
    pub fn is_system_schema(name: &str, include_mysql: bool) -> bool {
        let name = name.to_lowercase();
        matches!(
            name.as_str(),
            "information_schema" | "performance_schema" | "sys"
        ) || (include_mysql && name == "mysql")
    }

    /// Default collation of a database
    pub async fn get_db_collation(&self, database: &str, role: ConnectionRole) -> String {
        if Self::is_system_schema(database, false) {
            return DEFAULT_COLLATION.to_string();
        }

        let value = if self.disable_is {
            let previous = self.engine.current_db().await;
            let switch = previous.as_deref() != Some(database);
            if switch && !self.engine.select_db(database, role).await {
                return DEFAULT_COLLATION.to_string();
            }
            let value = self
                .engine
                .fetch_value("SELECT @@collation_database", role)
                .await;
            if switch {
                if let Some(previous) = previous {
                    self.engine.select_db(&previous, role).await;
                }
            }
            value
        } else {
            let sql = format!(
                "SELECT DEFAULT_COLLATION_NAME FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME = '{}' LIMIT 1",
                self.escape(role, database).await
            );
            self.engine.fetch_value(&sql, role).await
        };

        value.unwrap_or_else(|| DEFAULT_COLLATION.to_string())
    }

    pub async fn get_server_collation(&self, role: ConnectionRole) -> String {
        self.engine
            .fetch_value("SELECT @@collation_server", role)
            .await
            .unwrap_or_else(|| DEFAULT_COLLATION.to_string())
    }

    // --- Cache access ---

    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    pub async fn get_cached_tables(&self, databases: &[&str]) -> IndexMap<String, TableMetadata> {
        self.cache.get_cached(databases).await
    }

    pub async fn get_cached_table(&self, database: &str, table: &str) -> Option<TableMetadata> {
        self.cache.get_cached_table(database, table).await
    }

    pub async fn clear_table_cache(&self, databases: Option<&[&str]>) {
        self.cache.clear(databases).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{DebugConfig, ServerConfig};
    use crate::db::connection::ConnectionManager;
    use crate::db::drivers::dummy::QueryMatch;
    use crate::db::drivers::DummyDriver;
    use crate::db::traits::{DriverError, FieldMeta};

    async fn setup(config: Config) -> (Arc<DummyDriver>, SchemaMetadataManager) {
        let driver = Arc::new(DummyDriver::new());
        let server = ServerConfig {
            user: Some("app_test".to_string()),
            ..config.server.clone()
        };
        let manager = Arc::new(ConnectionManager::new(server, driver.clone()));
        manager.connect(ConnectionRole::User, None).await.unwrap();
        let engine = Arc::new(QueryEngine::new(manager, DebugConfig::default()));
        let schema = SchemaMetadataManager::new(engine, Arc::new(TableCache::new()), &config);
        (driver, schema)
    }

    fn legacy_config() -> Config {
        let mut config = Config::default();
        config.server.disable_is = true;
        config
    }

    fn names(tables: &IndexMap<String, TableMetadata>) -> Vec<&str> {
        tables.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_table_condition() {
        let list = TableSelector::List(vec!["car".to_string(), "manuf".to_string()]);
        assert_eq!(
            table_condition(&list, Some(TableTypeFilter::View)),
            "AND t.`TABLE_NAME` IN ('car', 'manuf') AND t.`TABLE_TYPE` != 'BASE TABLE'"
        );
        assert_eq!(
            table_condition(&TableSelector::Exact("a".to_string()), Some(TableTypeFilter::Table)),
            "AND t.`TABLE_NAME` = 'a' AND t.`TABLE_TYPE` = 'BASE TABLE'"
        );
        assert_eq!(
            table_condition(&TableSelector::Group("p_".to_string()), None),
            "AND t.`TABLE_NAME` LIKE 'p\\_%' AND t.`TABLE_NAME` != 'p_'"
        );
        assert_eq!(table_condition(&TableSelector::All, None), "");
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("t2", "t10"), Ordering::Less);
        assert_eq!(natural_cmp("T10", "t2"), Ordering::Greater);
        assert_eq!(natural_cmp("A1", "a1"), Ordering::Equal);
        assert_eq!(natural_cmp("t02", "t2"), Ordering::Equal);
        assert_eq!(natural_cmp("abc", "abd"), Ordering::Less);
        assert_eq!(natural_cmp("x", "x1"), Ordering::Less);
    }

    #[test]
    fn test_catalog_sort_column() {
        assert_eq!(catalog_sort_column("Name"), "TABLE_NAME");
        assert_eq!(catalog_sort_column("Data_length"), "DATA_LENGTH");
        assert_eq!(catalog_sort_column("table_rows"), "TABLE_ROWS");
        assert_eq!(catalog_sort_column("1; DROP TABLE x"), "TABLE_NAME");
    }

    #[test]
    fn test_system_schema() {
        assert!(SchemaMetadataManager::is_system_schema("information_schema", false));
        assert!(SchemaMetadataManager::is_system_schema("PERFORMANCE_SCHEMA", false));
        assert!(SchemaMetadataManager::is_system_schema("sys", false));
        assert!(!SchemaMetadataManager::is_system_schema("mysql", false));
        assert!(SchemaMetadataManager::is_system_schema("mysql", true));
        assert!(!SchemaMetadataManager::is_system_schema("test", true));
    }

    #[tokio::test]
    async fn test_get_tables_full_from_catalog() {
        let mut config = Config::default();
        config.max_table_list = 2;
        let (driver, schema) = setup(config).await;

        let filter = TableFilter {
            limit: TableLimit::Default,
            sort_by: "Data_length".to_string(),
            sort_order: SortOrder::Desc,
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("test", &filter, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["fks", "table1"]);

        let last = driver.executed_queries().pop().unwrap();
        assert!(last.ends_with("ORDER BY `DATA_LENGTH` DESC LIMIT 2 OFFSET 0"));

        let fks = tables["fks"].to_record();
        assert_eq!(fks.len(), CATALOG_COLUMNS.len() + LEGACY_ALIASES.len());
        assert_eq!(fks["TABLE_CATALOG"].as_deref(), Some("def"));
        assert_eq!(fks["TABLE_TYPE"].as_deref(), Some("BASE TABLE"));
        assert_eq!(fks["INDEX_LENGTH"].as_deref(), Some("16384"));
        assert_eq!(fks["Index_length"].as_deref(), Some("16384"));
        assert_eq!(fks["Db"].as_deref(), Some("test"));
        assert_eq!(fks["Type"].as_deref(), Some("InnoDB"));
        assert_eq!(fks["Create_time"].as_deref(), Some("11/7/2018 10:57"));
        assert_eq!(fks["AUTO_INCREMENT"], None);
        assert_eq!(fks.get_index(21).map(|(k, _)| k.as_str()), Some("Db"));

        let table1 = tables["table1"].to_record();
        assert_eq!(table1["Comment"].as_deref(), Some("table 1"));
        assert_eq!(table1["TABLE_COMMENT"].as_deref(), Some("table 1"));
        assert_eq!(table1["Name"], table1["TABLE_NAME"]);
    }

    #[tokio::test]
    async fn test_both_sources_normalize_alike() {
        let (_, catalog) = setup(Config::default()).await;
        let (driver, legacy) = setup(legacy_config()).await;

        let from_catalog = catalog
            .get_tables_full("test", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();
        let from_legacy = legacy
            .get_tables_full("test", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();

        assert_eq!(from_catalog, from_legacy);
        assert_eq!(to_records(&from_catalog), to_records(&from_legacy));
        assert!(driver
            .executed_queries()
            .iter()
            .all(|q| !q.contains("information_schema")));
    }

    #[tokio::test]
    async fn test_catalog_failure_falls_back_to_legacy() {
        let (driver, schema) = setup(Config::default()).await;

        let filter = TableFilter {
            table: TableSelector::Group("shop".to_string()),
            table_type: Some(TableTypeFilter::Table),
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &filter, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["shop_items", "shop_orders"]);

        let executed = driver.executed_queries();
        assert!(executed[0].contains("`information_schema`.`TABLES`"));
        assert_eq!(
            executed[1],
            "SHOW TABLE STATUS FROM `shop` WHERE `Name` LIKE 'shop%' AND `Comment` != 'VIEW'"
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_falls_back_to_legacy() {
        let (driver, schema) = setup(Config::default()).await;
        driver.set_rows(
            QueryMatch::contains("`TABLE_SCHEMA` IN ('shop')"),
            CATALOG_COLUMNS,
            &[],
        );

        let tables = schema
            .get_tables_full("shop", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(tables.len(), 5);
        assert!(driver
            .executed_queries()
            .iter()
            .any(|q| q.starts_with("SHOW TABLE STATUS")));
    }

    #[tokio::test]
    async fn test_both_sources_failing() {
        let (_, schema) = setup(Config::default()).await;
        let err = schema
            .get_tables_full("missing", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::MetadataUnavailable { .. }));
        assert!(err.is_execution_error());

        let (_, legacy) = setup(legacy_config()).await;
        assert!(legacy
            .get_tables_full("missing", &TableFilter::default(), ConnectionRole::User)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_legacy_filters_in_memory() {
        let (_, schema) = setup(legacy_config()).await;

        let exact = TableFilter {
            table: TableSelector::Exact("shop".to_string()),
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &exact, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["shop"]);

        let list = TableFilter {
            table: TableSelector::List(vec!["shop_view".to_string(), "other".to_string()]),
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &list, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["other", "shop_view"]);

        let views = TableFilter {
            table_type: Some(TableTypeFilter::View),
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &views, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["shop_view"]);
        assert_eq!(tables["shop_view"].table_type, "VIEW");
        assert_eq!(tables["shop_view"].to_record()["Engine"], None);
    }

    #[tokio::test]
    async fn test_legacy_size_sort_and_window() {
        let (_, schema) = setup(legacy_config()).await;

        let filter = TableFilter {
            offset: 1,
            limit: TableLimit::Count(2),
            sort_by: "Data_length".to_string(),
            sort_order: SortOrder::Desc,
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &filter, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["shop_orders", "other"]);
    }

    #[tokio::test]
    async fn test_legacy_column_sort_breaks_ties_by_name() {
        let (_, schema) = setup(legacy_config()).await;

        let filter = TableFilter {
            sort_by: "Engine".to_string(),
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("shop", &filter, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(
            names(&tables),
            vec!["shop_view", "other", "shop", "shop_items", "shop_orders"]
        );
    }

    #[tokio::test]
    async fn test_natural_name_order() {
        let (driver, schema) = setup(legacy_config()).await;
        let row = |name| {
            [
                Some(name), Some("InnoDB"), None, None, None, None, None, None, None, None,
                None, None, None, None, None, None, None, Some(""),
            ]
        };
        let (t10, t2, t1) = (row("t10"), row("T2"), row("t1"));
        driver.set_rows(
            QueryMatch::prefix("SHOW TABLE STATUS FROM `nat`"),
            &[
                "Name", "Engine", "Version", "Row_format", "Rows", "Avg_row_length",
                "Data_length", "Max_data_length", "Index_length", "Data_free",
                "Auto_increment", "Create_time", "Update_time", "Check_time", "Collation",
                "Checksum", "Create_options", "Comment",
            ],
            &[&t10, &t2, &t1],
        );

        let tables = schema
            .get_tables_full("nat", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["t1", "T2", "t10"]);

        let desc = TableFilter {
            sort_order: SortOrder::Desc,
            ..TableFilter::default()
        };
        let tables = schema
            .get_tables_full("nat", &desc, ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(names(&tables), vec!["t10", "T2", "t1"]);
    }

    #[tokio::test]
    async fn test_listing_fills_cache() {
        let (_, schema) = setup(Config::default()).await;

        let tables = schema
            .get_tables_full("test", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(schema.get_cached_tables(&["test"]).await, tables);
        assert_eq!(
            schema.get_cached_table("test", "fks").await.as_ref(),
            tables.get("fks")
        );

        schema.clear_table_cache(None).await;
        assert!(schema.get_cached_tables(&["test"]).await.is_empty());
        assert!(schema.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_get_tables() {
        let (_, schema) = setup(Config::default()).await;
        assert_eq!(
            schema.get_tables("test", ConnectionRole::User).await,
            vec!["fks", "table1", "table2"]
        );
        assert!(schema.get_tables("missing", ConnectionRole::User).await.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_key_constraints() {
        let (driver, schema) = setup(Config::default()).await;

        let keys = schema
            .get_foreign_key_constraints("test", &["table1", "table2"], ConnectionRole::User)
            .await;
        assert_eq!(
            keys,
            vec![ForeignKeyConstraint {
                table_name: "table2".to_string(),
                column_name: "idtable2".to_string(),
                referenced_table_name: "table1".to_string(),
                referenced_column_name: "idtable1".to_string(),
            }]
        );
        let sql = driver.executed_queries().pop().unwrap();
        assert!(sql.contains("AND TABLE_NAME IN ('table1', 'table2') AND REFERENCED_TABLE_NAME IN ('table1', 'table2')"));

        assert!(schema
            .get_foreign_key_constraints("test", &[], ConnectionRole::User)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_column_map_from_sql() {
        let (driver, schema) = setup(Config::default()).await;
        driver.set_result(
            QueryMatch::exact("view_sql_query"),
            vec![
                FieldMeta::new("meta1_name", Some("meta1_table")),
                FieldMeta::new("meta2_name", Some("meta2_table")),
            ],
            Vec::new(),
        );

        let map = schema
            .get_column_map_from_sql(
                "view_sql_query",
                &["view_columns1", "view_columns2"],
                ConnectionRole::User,
            )
            .await
            .unwrap();
        assert_eq!(
            map[0],
            ColumnMapping {
                table_name: "meta1_table".to_string(),
                referring_column: "meta1_name".to_string(),
                real_column: Some("view_columns1".to_string()),
            }
        );
        assert_eq!(map[1].table_name, "meta2_table");
        assert_eq!(map[1].real_column.as_deref(), Some("view_columns2"));

        let short = schema
            .get_column_map_from_sql("view_sql_query", &["only"], ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(short[1].real_column, None);
    }

    #[tokio::test]
    async fn test_column_map_failures() {
        let (driver, schema) = setup(Config::default()).await;
        driver.set_error(QueryMatch::exact("broken"), DriverError::new(1064, "syntax"));

        assert!(schema
            .get_column_map_from_sql("broken", &["a"], ConnectionRole::User)
            .await
            .unwrap()
            .is_empty());

        assert!(matches!(
            schema
                .get_column_map_from_sql("SELECT 1", &["a"], ConnectionRole::User)
                .await,
            Err(DatabaseError::FieldMetadataUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_db_collation() {
        let (driver, schema) = setup(Config::default()).await;

        assert_eq!(
            schema
                .get_db_collation("information_schema", ConnectionRole::User)
                .await,
            "utf8_general_ci"
        );
        assert!(driver.executed_queries().is_empty());

        assert_eq!(
            schema.get_db_collation("app_test", ConnectionRole::User).await,
            "utf8_general_ci"
        );
        assert!(driver.executed_queries()[0].contains("SCHEMA_NAME = 'app_test'"));

        // no fixture for this one, falls back to the default
        assert_eq!(
            schema.get_db_collation("shop", ConnectionRole::User).await,
            DEFAULT_COLLATION
        );
    }

    #[tokio::test]
    async fn test_db_collation_without_catalog() {
        let (driver, schema) = setup(legacy_config()).await;
        driver.set_rows(
            QueryMatch::exact("SELECT @@collation_database"),
            &["@@collation_database"],
            &[&[Some("latin1_swedish_ci")]],
        );

        schema.engine.select_db("test", ConnectionRole::User).await;
        assert_eq!(
            schema.get_db_collation("shop", ConnectionRole::User).await,
            "latin1_swedish_ci"
        );
        assert_eq!(
            driver.executed_queries(),
            vec![
                "USE `test`;".to_string(),
                "USE `shop`;".to_string(),
                "SELECT @@collation_database".to_string(),
                "USE `test`;".to_string(),
            ]
        );
        assert_eq!(schema.engine.current_db().await.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_db_collation_unknown_database_without_catalog() {
        let (driver, schema) = setup(legacy_config()).await;
        driver.set_error(
            QueryMatch::exact("USE `missing`;"),
            DriverError::new(1049, "Unknown database 'missing'"),
        );
        driver.set_rows(
            QueryMatch::exact("SELECT @@collation_database"),
            &["@@collation_database"],
            &[&[Some("latin1_swedish_ci")]],
        );

        schema.engine.select_db("test", ConnectionRole::User).await;
        assert_eq!(
            schema.get_db_collation("missing", ConnectionRole::User).await,
            DEFAULT_COLLATION
        );
        assert_eq!(
            driver.executed_queries(),
            vec!["USE `test`;".to_string(), "USE `missing`;".to_string()]
        );
        assert_eq!(schema.engine.current_db().await.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_server_collation() {
        let (_, schema) = setup(Config::default()).await;
        assert_eq!(
            schema.get_server_collation(ConnectionRole::User).await,
            "utf8_general_ci"
        );
    }
}
