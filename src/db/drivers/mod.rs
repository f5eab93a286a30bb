// Database Drivers (MySQL over the network, fixture-backed dummy)
// Contains implementations of the driver contract plus shared literal escaping

pub mod dummy;
pub mod mysql;

// Re-export drivers
pub use dummy::{DummyDriver, QueryMatch};
pub use mysql::MysqlDriver;

/// Escape text for a single- or double-quoted MySQL string literal
pub fn escape_mysql_string(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\x1a' => escaped.push_str("\\Z"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape the `LIKE` wildcards `_` and `%`; apply to already escaped text
pub fn escape_mysql_wildcards(text: &str) -> String {
    text.replace('_', "\\_").replace('%', "\\%")
}
