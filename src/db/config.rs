// Configuration Model
// Raw settings handed over by the caller, consumed as-is

use crate::db::traits::DatabaseError;
use serde::{Deserialize, Serialize};

/// Settings of one configured server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)] // Don't serialize password
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub compress: Option<bool>,

    #[serde(rename = "controluser")]
    pub control_user: Option<String>,
    #[serde(rename = "controlpass", skip_serializing)]
    pub control_pass: Option<String>,
    #[serde(rename = "controlhost")]
    pub control_host: Option<String>,
    #[serde(rename = "controlport")]
    pub control_port: Option<u16>,
    pub control_ssl: Option<bool>,

    /// Databases to show; empty means all
    pub only_db: Vec<String>,

    /// Skip `information_schema` and use the legacy SHOW commands
    #[serde(rename = "DisableIS")]
    pub disable_is: bool,

    /// Time zone to set for each user session; empty keeps the server default
    #[serde(rename = "SessionTimeZone")]
    pub session_time_zone: String,
}

/// Oldest server version that is fully supported
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MinVersion {
    pub internal: u32,
    pub human: String,
}

impl Default for MinVersion {
    fn default() -> Self {
        Self {
            internal: 50500,
            human: "5.5.0".to_string(),
        }
    }
}

/// SQL debugging switches
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebugConfig {
    /// Record every statement in the session debug log
    pub sql: bool,
    /// Also emit a log event per statement
    pub sqllog: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "Server")]
    pub server: ServerConfig,

    /// Page size used when a table listing asks for the default limit
    #[serde(rename = "MaxTableList")]
    pub max_table_list: usize,

    /// Sort table names naturally (`t2` before `t10`)
    #[serde(rename = "NaturalOrder")]
    pub natural_order: bool,

    #[serde(rename = "MysqlMinVersion")]
    pub mysql_min_version: MinVersion,

    #[serde(rename = "DBG")]
    pub debug: DebugConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            max_table_list: 250,
            natural_order: true,
            mysql_min_version: MinVersion::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Config {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration value
    pub fn from_json(text: &str) -> Result<Self, DatabaseError> {
        serde_json::from_str(text).map_err(|e| DatabaseError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.max_table_list == 0 {
            return Err(DatabaseError::InvalidConfig(
                "MaxTableList must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
