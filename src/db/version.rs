// Server Version Handling
// Parses version strings and records what kind of server the user connection talks to

use serde::{Deserialize, Serialize};

/// Convert a version string into `major * 10000 + minor * 100 + patch`.
///
/// Reads up to three `.`/`-` separated numeric components from the start of
/// the string. Anything after them (vendor tags such as `-MariaDB-log`) is
/// ignored and missing components count as 0.
pub fn version_to_int(version: &str) -> u32 {
    let mut parts = [0u32; 3];
    let mut chars = version.trim().chars().peekable();

    for (index, slot) in parts.iter_mut().enumerate() {
        let mut digits = String::new();
        while let Some(&c) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            chars.next();
        }
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().unwrap_or(0);

        match chars.peek() {
            Some('.') | Some('-') if index < 2 => {
                chars.next();
            }
            _ => break,
        }
    }

    parts[0]
        .saturating_mul(10000)
        .saturating_add(parts[1].saturating_mul(100))
        .saturating_add(parts[2])
}

/// Server family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ServerFlavor {
    #[default]
    Mysql,
    MariaDb,
    Percona,
}

impl ServerFlavor {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            ServerFlavor::Mysql => "MySQL",
            ServerFlavor::MariaDb => "MariaDB",
            ServerFlavor::Percona => "Percona Server",
        }
    }
}

/// What the user connection reported about the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub version_int: u32,
    pub version_string: String,
    pub version_comment: String,
    pub flavor: ServerFlavor,
    pub charset_connection: String,
    pub collation_connection: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            version_int: 55000,
            version_string: "5.50.0".to_string(),
            version_comment: String::new(),
            flavor: ServerFlavor::Mysql,
            charset_connection: "utf8".to_string(),
            collation_connection: "utf8_general_ci".to_string(),
        }
    }
}

impl ServerInfo {
    /// Build from `@@version` and `@@version_comment`
    pub fn from_version(version: &str, comment: &str) -> Self {
        let flavor = if version.to_lowercase().contains("mariadb") {
            ServerFlavor::MariaDb
        } else if comment.to_lowercase().contains("percona") {
            ServerFlavor::Percona
        } else {
            ServerFlavor::Mysql
        };

        let version_int = version_to_int(version);
        let (charset, collation) = Self::default_charset_for(version_int);

        Self {
            version_int,
            version_string: version.to_string(),
            version_comment: comment.to_string(),
            flavor,
            charset_connection: charset.to_string(),
            collation_connection: collation.to_string(),
        }
    }

    /// Connection charset and collation to request from a server of this version
    pub fn default_charset_for(version_int: u32) -> (&'static str, &'static str) {
        if version_int > 50503 {
            ("utf8mb4", "utf8mb4_general_ci")
        } else {
            ("utf8", "utf8_general_ci")
        }
    }

    pub fn major_version(&self) -> u32 {
        self.version_int / 10000
    }

    pub fn is_mariadb(&self) -> bool {
        self.flavor == ServerFlavor::MariaDb
    }

    pub fn is_percona(&self) -> bool {
        self.flavor == ServerFlavor::Percona
    }

    /// Whether the server is older than the supported minimum
    pub fn needs_upgrade(&self, min_version: u32) -> bool {
        self.version_int < min_version
    }
}
