// Database Session
// Owns connections, query engine, metadata service and per-session caches

use crate::db::cache::TableCache;
use crate::db::config::{Config, ServerConfig};
use crate::db::connection::ConnectionManager;
use crate::db::query::{DebugQuery, QueryEngine};
use crate::db::registry::DriverRegistry;
use crate::db::schema::SchemaMetadataManager;
use crate::db::traits::{ConnectionRole, DatabaseDriver, DatabaseError, QueryOptions};
use crate::db::version::ServerInfo;
use std::sync::Arc;
use tokio::sync::RwLock;

const RDS_BASEDIR_PREFIX: &str = "/rdsdbbin/";

/// Everything one client session needs to talk to the server.
///
/// State lives here rather than in globals: the connection handles, the
/// debug log and affected-row cache (inside the [`QueryEngine`]), the table
/// cache, and what the server reported about itself. It is created at
/// session start, cleared with [`DatabaseSession::clear_caches`], and torn
/// down by dropping it.
pub struct DatabaseSession {
    config: Config,
    connections: Arc<ConnectionManager>,
    engine: Arc<QueryEngine>,
    schema: SchemaMetadataManager,
    server_info: RwLock<ServerInfo>,
    current_user: RwLock<Option<String>>,
    amazon_rds: RwLock<Option<bool>>,
}

impl DatabaseSession {
    pub fn new(config: Config, driver: Arc<dyn DatabaseDriver>) -> Result<Self, DatabaseError> {
        config.validate()?;

        let connections = Arc::new(ConnectionManager::new(config.server.clone(), driver));
        let engine = Arc::new(QueryEngine::new(Arc::clone(&connections), config.debug));
        let schema =
            SchemaMetadataManager::new(Arc::clone(&engine), Arc::new(TableCache::new()), &config);

        Ok(Self {
            config,
            connections,
            engine,
            schema,
            server_info: RwLock::new(ServerInfo::default()),
            current_user: RwLock::new(None),
            amazon_rds: RwLock::new(None),
        })
    }

    /// Session using the driver registered under `driver_name`
    pub async fn from_registry(
        config: Config,
        registry: &DriverRegistry,
        driver_name: &str,
    ) -> Result<Self, DatabaseError> {
        let driver = registry.get_driver(driver_name).await?;
        Self::new(config, driver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn schema(&self) -> &SchemaMetadataManager {
        &self.schema
    }

    /// Open a role's connection; the user connection is also initialized
    pub async fn connect(&self, role: ConnectionRole) -> Result<(), DatabaseError> {
        self.connections.connect(role, None).await?;
        self.engine.reset_role(role).await;
        if role == ConnectionRole::User {
            self.post_connect().await;
        }
        Ok(())
    }

    /// Open a role's connection against another server definition
    pub async fn connect_to(
        &self,
        role: ConnectionRole,
        server: &ServerConfig,
    ) -> Result<(), DatabaseError> {
        self.connections.connect(role, Some(server)).await?;
        self.engine.reset_role(role).await;
        if role == ConnectionRole::User {
            self.post_connect().await;
        }
        Ok(())
    }

    pub async fn disconnect(&self, role: ConnectionRole) {
        self.connections.disconnect(role).await;
        self.engine.reset_role(role).await;
    }

    /// Disconnect both roles and forget everything cached
    pub async fn close(&self) {
        self.disconnect(ConnectionRole::Control).await;
        self.disconnect(ConnectionRole::User).await;
        self.clear_caches().await;
    }

    /// Read the server version and set up charset and time zone
    pub async fn post_connect(&self) {
        let role = ConnectionRole::User;

        let info = match self
            .engine
            .fetch_single_row("SELECT @@version, @@version_comment", role)
            .await
        {
            Some(row) => {
                let version = row.get("@@version").cloned().flatten().unwrap_or_default();
                let comment = row
                    .get("@@version_comment")
                    .cloned()
                    .flatten()
                    .unwrap_or_default();
                ServerInfo::from_version(&version, &comment)
            }
            None => ServerInfo::default(),
        };

        if info.needs_upgrade(self.config.mysql_min_version.internal) {
            tracing::warn!(
                version = %info.version_string,
                minimum = %self.config.mysql_min_version.human,
                "Server version is older than the supported minimum"
            );
        }

        let set_names = format!(
            "SET NAMES '{}' COLLATE '{}';",
            info.charset_connection, info.collation_connection
        );
        if self
            .engine
            .try_query(&set_names, role, QueryOptions::BUFFERED, false)
            .await
            .is_none()
        {
            tracing::warn!(charset = %info.charset_connection, "Failed to set connection charset");
        }

        let time_zone = &self.config.server.session_time_zone;
        if !time_zone.is_empty() {
            let sql = format!(
                "SET time_zone = '{}';",
                self.engine.escape_string(role, time_zone).await
            );
            if self
                .engine
                .try_query(&sql, role, QueryOptions::BUFFERED, false)
                .await
                .is_none()
            {
                tracing::warn!(time_zone = %time_zone, "Unable to use the configured session time zone");
            }
        }

        tracing::info!(
            version = info.version_int,
            flavor = info.flavor.display_name(),
            charset = %info.charset_connection,
            "User connection initialized"
        );
        *self.server_info.write().await = info;
    }

    /// What the server reported on the last user connect
    pub async fn server_info(&self) -> ServerInfo {
        self.server_info.read().await.clone()
    }

    /// Change the connection collation.
    ///
    /// A `utf8mb4_` collation is mapped to its `utf8_` counterpart when the
    /// connection charset is `utf8`.
    pub async fn set_collation(&self, collation: &str) -> bool {
        let role = ConnectionRole::User;
        let charset = self.server_info.read().await.charset_connection.clone();

        let collation = match collation.strip_prefix("utf8mb4_") {
            Some(rest) if charset == "utf8" => format!("utf8_{}", rest),
            _ => collation.to_string(),
        };

        let sql = format!(
            "SET collation_connection = '{}';",
            self.engine.escape_string(role, &collation).await
        );
        if self
            .engine
            .try_query(&sql, role, QueryOptions::BUFFERED, false)
            .await
            .is_none()
        {
            tracing::warn!(collation = %collation, "Failed to set collation");
            return false;
        }

        self.server_info.write().await.collation_connection = collation;
        true
    }

    /// `user@host` of the current account; `"@"` when it cannot be read
    pub async fn get_current_user(&self) -> String {
        if let Some(user) = self.current_user.read().await.clone() {
            return user;
        }

        match self
            .engine
            .fetch_value("SELECT CURRENT_USER();", ConnectionRole::User)
            .await
        {
            Some(user) => {
                *self.current_user.write().await = Some(user.clone());
                user
            }
            None => "@".to_string(),
        }
    }

    /// Current account split into user and host
    pub async fn get_current_user_and_host(&self) -> (String, String) {
        let user = self.get_current_user().await;
        match user.rsplit_once('@') {
            Some((name, host)) => (name.to_string(), host.to_string()),
            None => (user, String::new()),
        }
    }

    /// Whether the server runs on Amazon RDS
    pub async fn is_amazon_rds(&self) -> bool {
        if let Some(cached) = *self.amazon_rds.read().await {
            return cached;
        }

        let is_rds = self
            .engine
            .fetch_value("SELECT @@basedir", ConnectionRole::User)
            .await
            .is_some_and(|basedir| basedir.starts_with(RDS_BASEDIR_PREFIX));
        *self.amazon_rds.write().await = Some(is_rds);
        is_rds
    }

    /// Databases visible to the user; `only_db` when configured
    pub async fn get_databases(&self) -> Vec<String> {
        if !self.config.server.only_db.is_empty() {
            return self.config.server.only_db.clone();
        }

        self.engine
            .fetch_column("SHOW DATABASES", ConnectionRole::User)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("Database listing failed: {}", e);
                Vec::new()
            })
    }

    pub async fn debug_queries(&self) -> Vec<DebugQuery> {
        self.engine.debug_queries().await
    }

    /// Forget cached tables, account details and debug entries
    pub async fn clear_caches(&self) {
        self.schema.clear_table_cache(None).await;
        *self.current_user.write().await = None;
        *self.amazon_rds.write().await = None;
        self.engine.clear_debug_log().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::drivers::dummy::QueryMatch;
    use crate::db::drivers::DummyDriver;
    use crate::db::schema::TableFilter;
    use crate::db::traits::DriverError;

    fn config() -> Config {
        Config::new(ServerConfig {
            user: Some("app_test".to_string()),
            ..ServerConfig::default()
        })
    }

    async fn connected(config: Config) -> (Arc<DummyDriver>, DatabaseSession) {
        let driver = Arc::new(DummyDriver::new());
        let session = DatabaseSession::new(config, driver.clone()).unwrap();
        session.connect(ConnectionRole::User).await.unwrap();
        (driver, session)
    }

    #[tokio::test]
    async fn test_post_connect() {
        let (driver, session) = connected(config()).await;

        let info = session.server_info().await;
        assert_eq!(info.version_int, 80001);
        assert_eq!(info.charset_connection, "utf8mb4");
        assert_eq!(
            driver.executed_queries(),
            vec![
                "SELECT @@version, @@version_comment".to_string(),
                "SET NAMES 'utf8mb4' COLLATE 'utf8mb4_general_ci';".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_post_connect_old_server_and_time_zone() {
        let driver = Arc::new(DummyDriver::new());
        driver.set_rows(
            QueryMatch::exact("SELECT @@version, @@version_comment"),
            &["@@version", "@@version_comment"],
            &[&[Some("5.5.3"), Some("Source distribution")]],
        );
        let mut config = config();
        config.server.session_time_zone = "+00:00".to_string();

        let session = DatabaseSession::new(config, driver.clone()).unwrap();
        session.connect(ConnectionRole::User).await.unwrap();

        let executed = driver.executed_queries();
        assert_eq!(executed[1], "SET NAMES 'utf8' COLLATE 'utf8_general_ci';");
        assert_eq!(executed[2], "SET time_zone = '+00:00';");
    }

    #[tokio::test]
    async fn test_set_collation() {
        let (driver, session) = connected(config()).await;

        assert!(session.set_collation("utf8_czech_ci").await);
        assert_eq!(
            driver.executed_queries().last().map(String::as_str),
            Some("SET collation_connection = 'utf8_czech_ci';")
        );

        assert!(session.set_collation("utf8mb4_bin_ci").await);
        assert_eq!(
            driver.executed_queries().last().map(String::as_str),
            Some("SET collation_connection = 'utf8mb4_bin_ci';")
        );
        assert_eq!(session.server_info().await.collation_connection, "utf8mb4_bin_ci");
    }

    #[tokio::test]
    async fn test_set_collation_on_utf8_connection() {
        let driver = Arc::new(DummyDriver::new());
        driver.set_rows(
            QueryMatch::exact("SELECT @@version, @@version_comment"),
            &["@@version", "@@version_comment"],
            &[&[Some("5.5.3"), Some("")]],
        );
        let session = DatabaseSession::new(config(), driver.clone()).unwrap();
        session.connect(ConnectionRole::User).await.unwrap();

        assert!(session.set_collation("utf8mb4_bin_ci").await);
        assert_eq!(
            driver.executed_queries().last().map(String::as_str),
            Some("SET collation_connection = 'utf8_bin_ci';")
        );
    }

    #[tokio::test]
    async fn test_set_collation_failure() {
        let (driver, session) = connected(config()).await;
        driver.set_error(
            QueryMatch::prefix("SET collation_connection"),
            DriverError::new(1273, "Unknown collation: 'nope'"),
        );

        assert!(!session.set_collation("nope").await);
        assert_eq!(session.server_info().await.collation_connection, "utf8mb4_general_ci");
    }

    #[tokio::test]
    async fn test_current_user() {
        let cases = [
            (Some("app@localhost"), "app@localhost", ("app", "localhost")),
            (Some("@localhost"), "@localhost", ("", "localhost")),
            (None, "@", ("", "")),
        ];

        for (value, expected, (user, host)) in cases {
            let driver = Arc::new(DummyDriver::new());
            match value {
                Some(value) => driver.set_rows(
                    QueryMatch::exact("SELECT CURRENT_USER();"),
                    &["CURRENT_USER()"],
                    &[&[Some(value)]],
                ),
                None => driver.set_error(
                    QueryMatch::exact("SELECT CURRENT_USER();"),
                    DriverError::new(1064, "error"),
                ),
            }
            let session = DatabaseSession::new(config(), driver).unwrap();
            session.connect(ConnectionRole::User).await.unwrap();

            assert_eq!(session.get_current_user().await, expected);
            assert_eq!(
                session.get_current_user_and_host().await,
                (user.to_string(), host.to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_current_user_is_cached() {
        let (driver, session) = connected(config()).await;

        assert_eq!(session.get_current_user().await, "app_test@localhost");
        driver.set_error(
            QueryMatch::exact("SELECT CURRENT_USER();"),
            DriverError::new(2006, "gone away"),
        );
        assert_eq!(session.get_current_user().await, "app_test@localhost");

        session.clear_caches().await;
        assert_eq!(session.get_current_user().await, "@");
    }

    #[tokio::test]
    async fn test_amazon_rds() {
        let (driver, session) = connected(config()).await;
        assert!(!session.is_amazon_rds().await);

        driver.set_rows(
            QueryMatch::exact("SELECT @@basedir"),
            &["@@basedir"],
            &[&[Some("/rdsdbbin/mysql-5.7.18.R1/")]],
        );
        // answered from the cache
        assert!(!session.is_amazon_rds().await);

        session.clear_caches().await;
        assert!(session.is_amazon_rds().await);
    }

    #[tokio::test]
    async fn test_get_databases() {
        let (_, session) = connected(config()).await;
        assert_eq!(session.get_databases().await.len(), 5);

        let mut limited = config();
        limited.server.only_db = vec!["shop".to_string()];
        let (driver, session) = connected(limited).await;
        assert_eq!(session.get_databases().await, vec!["shop"]);
        assert!(!driver
            .executed_queries()
            .iter()
            .any(|q| q == "SHOW DATABASES"));
    }

    #[tokio::test]
    async fn test_control_connection() {
        let (driver, session) = connected(config()).await;
        assert!(matches!(
            session.connect(ConnectionRole::Control).await,
            Err(DatabaseError::ConnectionFailed(_))
        ));

        let mut with_control = config();
        with_control.server.control_user = Some("control".to_string());
        with_control.server.control_pass = Some("secret".to_string());
        let session = DatabaseSession::new(with_control, driver.clone()).unwrap();
        let before = driver.executed_queries().len();

        session.connect(ConnectionRole::Control).await.unwrap();
        assert!(session.connections().is_connected(ConnectionRole::Control).await);
        assert!(!session.connections().is_connected(ConnectionRole::User).await);
        assert_eq!(driver.executed_queries().len(), before);
    }

    #[tokio::test]
    async fn test_connect_to_other_server() {
        let driver = Arc::new(DummyDriver::new());
        let session = DatabaseSession::new(Config::default(), driver).unwrap();
        assert!(session.connect(ConnectionRole::User).await.is_err());

        let other = ServerConfig {
            user: Some("root".to_string()),
            ..ServerConfig::default()
        };
        session.connect_to(ConnectionRole::User, &other).await.unwrap();
        assert_eq!(session.server_info().await.version_string, "8.0.1");
    }

    #[tokio::test]
    async fn test_debug_log() {
        let mut config = config();
        config.debug.sql = true;
        let (_, session) = connected(config).await;
        session.engine().clear_debug_log().await;

        session
            .engine()
            .try_query("SELECT 1", ConnectionRole::User, QueryOptions::BUFFERED, true)
            .await;
        let log = session.debug_queries().await;
        assert_eq!(log[0].query, "SELECT 1");
        assert_eq!(log[0].role, ConnectionRole::User);
    }

    #[tokio::test]
    async fn test_table_cache_round_trip() {
        let (_, session) = connected(config()).await;

        let tables = session
            .schema()
            .get_tables_full("test", &TableFilter::default(), ConnectionRole::User)
            .await
            .unwrap();
        assert_eq!(session.schema().get_cached_tables(&["test"]).await, tables);

        session.clear_caches().await;
        assert!(session.schema().get_cached_tables(&["test"]).await.is_empty());
        session.clear_caches().await;
        assert!(session.schema().get_cached_tables(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_from_registry() {
        let registry = DriverRegistry::with_defaults().await;

        let session = DatabaseSession::from_registry(config(), &registry, "dummy")
            .await
            .unwrap();
        assert_eq!(session.connections().driver().driver_name(), "dummy");

        assert!(matches!(
            DatabaseSession::from_registry(config(), &registry, "oracle").await,
            Err(DatabaseError::DriverNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close() {
        let (_, session) = connected(config()).await;
        session.close().await;
        assert!(!session.connections().is_connected(ConnectionRole::User).await);
    }

    #[tokio::test]
    async fn test_reconnect_forgets_selected_database() {
        let mut legacy = config();
        legacy.server.disable_is = true;
        let (driver, session) = connected(legacy).await;
        driver.set_rows(
            QueryMatch::exact("SELECT @@collation_database"),
            &["@@collation_database"],
            &[&[Some("latin1_swedish_ci")]],
        );

        assert!(session.engine().select_db("shop", ConnectionRole::User).await);
        session.disconnect(ConnectionRole::User).await;
        assert!(session.engine().current_db().await.is_none());

        session.connect(ConnectionRole::User).await.unwrap();
        let before = driver.executed_queries().len();
        assert_eq!(
            session
                .schema()
                .get_db_collation("shop", ConnectionRole::User)
                .await,
            "latin1_swedish_ci"
        );
        assert_eq!(
            driver.executed_queries()[before..].to_vec(),
            vec![
                "USE `shop`;".to_string(),
                "SELECT @@collation_database".to_string(),
            ]
        );
    }
}
