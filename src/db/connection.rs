// Connection Management
// Resolves per-role connection parameters and keeps one live handle per role

use crate::db::config::ServerConfig;
use crate::db::traits::{Connection, ConnectionRole, DatabaseDriver, DatabaseError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connection shape handed to the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub socket: Option<String>,
    pub port: u16,
    pub ssl: bool,
    pub compress: bool,

    // Credentials below are only carried on the user role
    pub user: Option<String>,
    #[serde(skip_serializing)] // Don't serialize password
    pub password: Option<String>,
    pub control_user: Option<String>,
    #[serde(skip_serializing)]
    pub control_pass: Option<String>,
    pub control_ssl: Option<bool>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            socket: None,
            port: 0,
            ssl: false,
            compress: false,
            user: None,
            password: None,
            control_user: None,
            control_pass: None,
            control_ssl: None,
        }
    }
}

/// Credentials plus connection shape for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub user: String,
    pub password: String,
    pub params: ConnectionParams,
}

fn normalize_host(host: Option<&str>) -> String {
    match host {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => "localhost".to_string(),
    }
}

fn normalize_socket(socket: Option<&str>) -> Option<String> {
    socket.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Work out user, password and connection shape for a role.
///
/// Returns `None` when the role has no credentials configured.
pub fn resolve_connection_params(
    server: &ServerConfig,
    role: ConnectionRole,
) -> Option<ResolvedConnection> {
    let host = normalize_host(server.host.as_deref());
    let shape = ConnectionParams {
        host: host.clone(),
        socket: normalize_socket(server.socket.as_deref()),
        port: server.port.unwrap_or(0),
        ssl: server.ssl.unwrap_or(false),
        compress: server.compress.unwrap_or(false),
        ..ConnectionParams::default()
    };

    match role {
        ConnectionRole::User => {
            let user = server.user.clone()?;
            let password = server.password.clone().unwrap_or_default();
            let params = ConnectionParams {
                user: Some(user.clone()),
                password: Some(password.clone()),
                control_user: server.control_user.clone(),
                control_pass: server.control_pass.clone(),
                control_ssl: server.control_ssl,
                ..shape
            };
            Some(ResolvedConnection {
                user,
                password,
                params,
            })
        }
        ConnectionRole::Control => {
            let user = server.control_user.clone()?;
            let password = server.control_pass.clone().unwrap_or_default();

            let mut params = match server.control_host.as_deref() {
                Some(control_host) if !control_host.is_empty() && control_host != host => {
                    // Different host: nothing but ssl is shared with the primary server
                    ConnectionParams {
                        host: control_host.to_string(),
                        ssl: shape.ssl,
                        ..ConnectionParams::default()
                    }
                }
                _ => shape,
            };
            if let Some(port) = server.control_port {
                params.port = port;
            }
            if let Some(control_ssl) = server.control_ssl {
                params.ssl = control_ssl;
            }

            Some(ResolvedConnection {
                user,
                password,
                params,
            })
        }
    }
}

/// Owns the connection handles of a session, at most one per role
pub struct ConnectionManager {
    server: ServerConfig,
    driver: Arc<dyn DatabaseDriver>,
    links: RwLock<HashMap<ConnectionRole, Arc<dyn Connection>>>,
}

impl ConnectionManager {
    pub fn new(server: ServerConfig, driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            server,
            driver,
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Parameters for a role, taken from `override_server` when given
    pub fn resolve_connection_params(
        &self,
        role: ConnectionRole,
        override_server: Option<&ServerConfig>,
    ) -> Option<ResolvedConnection> {
        resolve_connection_params(override_server.unwrap_or(&self.server), role)
    }

    /// Open the connection for a role and remember it
    ///
    /// An existing handle for the role is replaced.
    pub async fn connect(
        &self,
        role: ConnectionRole,
        override_server: Option<&ServerConfig>,
    ) -> Result<Arc<dyn Connection>, DatabaseError> {
        let resolved = self
            .resolve_connection_params(role, override_server)
            .ok_or_else(|| {
                DatabaseError::ConnectionFailed(format!(
                    "No credentials configured for the {} connection",
                    role
                ))
            })?;

        tracing::debug!(
            role = %role,
            host = %resolved.params.host,
            port = resolved.params.port,
            ssl = resolved.params.ssl,
            "Connecting"
        );

        let conn = match self
            .driver
            .connect(&resolved.user, &resolved.password, &resolved.params)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                let message = e.formatted();
                match role {
                    ConnectionRole::User => {
                        tracing::error!(role = %role, code = e.code, "Connection failed: {}", message)
                    }
                    ConnectionRole::Control => {
                        tracing::warn!(role = %role, code = e.code, "Connection for controluser as defined in your configuration failed: {}", message)
                    }
                }
                return Err(DatabaseError::ConnectionFailed(message));
            }
        };

        tracing::info!(role = %role, connection_id = conn.connection_id(), "Connected");

        let mut links = self.links.write().await;
        links.insert(role, Arc::clone(&conn));
        Ok(conn)
    }

    /// Drop the handle of a role
    pub async fn disconnect(&self, role: ConnectionRole) {
        let mut links = self.links.write().await;
        if links.remove(&role).is_some() {
            tracing::debug!(role = %role, "Disconnected");
        }
    }

    /// Handle of a role, if connected
    pub async fn connection(&self, role: ConnectionRole) -> Option<Arc<dyn Connection>> {
        let links = self.links.read().await;
        links.get(&role).map(Arc::clone)
    }

    pub async fn is_connected(&self, role: ConnectionRole) -> bool {
        self.links.read().await.contains_key(&role)
    }

    /// Check connection health
    pub async fn is_healthy(&self, role: ConnectionRole) -> bool {
        match self.connection(role).await {
            Some(conn) => conn.is_alive().await,
            None => false,
        }
    }
}
