// Error Classification
// Turns backend error codes into messages that tell the user what to do next

/// Generic client error, used when the driver cannot name the failure
pub const CR_UNKNOWN_ERROR: i32 = 2000;
/// Cannot connect through the socket, or the connection was refused
pub const CR_CONNECTION_ERROR: i32 = 2002;
/// Cannot connect to the server on the given host
pub const CR_CONN_HOST_ERROR: i32 = 2003;
/// TLS negotiation failed
pub const CR_SSL_CONNECTION_ERROR: i32 = 2026;
/// Access denied for a user that must authenticate another way
pub const ER_ACCESS_DENIED_NO_PASSWORD_ERROR: i32 = 1698;
/// Cannot create table (storage engine refused)
pub const ER_CANT_CREATE_TABLE: i32 = 1005;

const SEPARATOR: &str = " - ";

/// Format a backend error for display.
///
/// Known connectivity, credential and storage-engine codes get guidance
/// appended. Any other code returns the raw message unchanged.
pub fn format_error(code: i32, message: &str) -> String {
    let prefix = format!("#{} - {}", code, message);
    match code {
        CR_CONNECTION_ERROR => format!(
            "{}{}The server is not responding (or the local server's socket is not correctly configured).",
            prefix, SEPARATOR
        ),
        CR_CONN_HOST_ERROR => format!("{}{}The server is not responding.", prefix, SEPARATOR),
        ER_ACCESS_DENIED_NO_PASSWORD_ERROR => format!(
            "{}{}Logout and try as another user (logout).",
            prefix, SEPARATOR
        ),
        ER_CANT_CREATE_TABLE if message.contains("errno: 13") => format!(
            "{}{}Please check privileges of directory containing database.",
            prefix, SEPARATOR
        ),
        ER_CANT_CREATE_TABLE => format!(
            "{} (Details: engine status, server_engines InnoDB)",
            prefix
        ),
        _ => message.to_string(),
    }
}
