//! Tracing instrumentation for database operations.
//!
//! Every session operation runs inside a `debug`-level span named after the
//! constants in [`span_names`]. Statement spans also carry the keys in
//! [`attributes`].
//! Statements are recorded through [`SanitizationConfig`], which by default
//! replaces literal values with placeholders so secrets and user data do
//! not end up in logs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("tether_client=debug,tether_pool=debug")
//!     .init();
//!
//! let session = client.acquire_session().await?;
//! session.exec("SET max_memory_usage = 1000000").await?;
//! // emits span tether.exec{db.operation="SET" db.statement="SET max_memory_usage = ?"}
//! ```

/// Span names for database operations.
pub mod span_names {
    /// Span name for session acquisition.
    pub const ACQUIRE: &str = "tether.session.acquire";
    /// Span name for statement execution.
    pub const EXEC: &str = "tether.exec";
    /// Span name for opening a result cursor.
    pub const QUERY: &str = "tether.query";
    /// Span name for liveness probes.
    pub const PING: &str = "tether.ping";
    /// Span name for preparing a batch.
    pub const BATCH_PREPARE: &str = "tether.batch.prepare";
    /// Span name for sending a batch.
    pub const BATCH_SEND: &str = "tether.batch.send";
}

/// Attribute keys recorded on statement spans.
pub mod attributes {
    /// SQL statement (may be sanitized).
    pub const DB_STATEMENT: &str = "db.statement";
    /// Database operation type.
    pub const DB_OPERATION: &str = "db.operation";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Sanitize SQL by replacing literal values with placeholders.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            if c == '\\' {
                chars.next();
                continue;
            }
            if c == '\'' {
                // Doubled quote
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    continue;
                }
                in_string = false;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' {
            in_string = true;
            continue;
        }

        if c.is_ascii_digit() && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_') {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    // Unterminated literal
    if in_string {
        result.push_str(placeholder);
    }

    result
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "SET" => "SET",
        "SHOW" => "SHOW",
        "CREATE" => "CREATE",
        "ALTER" => "ALTER",
        "DROP" => "DROP",
        "TRUNCATE" => "TRUNCATE",
        "USE" => "USE",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_string_literals() {
        let config = SanitizationConfig::default();
        assert_eq!(
            config.sanitize("SET ROLE 'admin'"),
            "SET ROLE ?"
        );
        assert_eq!(
            config.sanitize("SELECT * FROM users WHERE name = 'o''neil'"),
            "SELECT * FROM users WHERE name = ?"
        );
    }

    #[test]
    fn test_sanitize_numbers_keep_identifiers() {
        let config = SanitizationConfig::default();
        assert_eq!(
            config.sanitize("SET max_memory_usage = 1000000"),
            "SET max_memory_usage = ?"
        );
        assert_eq!(
            config.sanitize("SELECT col1 FROM t2 LIMIT 10"),
            "SELECT col1 FROM t2 LIMIT ?"
        );
    }

    #[test]
    fn test_no_sanitization_truncates() {
        let config = SanitizationConfig {
            max_length: 10,
            ..SanitizationConfig::no_sanitization()
        };
        assert_eq!(config.sanitize("SELECT 'x' FROM t"), "SELECT ...");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let truncated = truncate_string("SELECT 'ééééé'", 12);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 12);
    }

    #[test]
    fn test_extract_operation() {
        assert_eq!(extract_operation("SELECT currentRole()"), "SELECT");
        assert_eq!(extract_operation("  set role admin"), "SET");
        assert_eq!(extract_operation("SHOW ROLES"), "SHOW");
        assert_eq!(
            extract_operation("CREATE TEMPORARY TABLE t (id UInt32)"),
            "CREATE"
        );
        assert_eq!(extract_operation("INSERT INTO t (a)"), "INSERT");
        assert_eq!(extract_operation("OPTIMIZE TABLE t"), "OTHER");
        assert_eq!(extract_operation(""), "OTHER");
    }

    proptest! {
        #[test]
        fn prop_sanitized_output_has_no_quotes_or_digits(sql in "[a-zA-Z0-9 '=_]{0,64}") {
            let sanitized = SanitizationConfig::default().sanitize(&sql);
            prop_assert!(!sanitized.contains('\''));
            let standalone_digit = sanitized
                .char_indices()
                .any(|(i, c)| c.is_ascii_digit()
                    && !sanitized[..i].ends_with(|p: char| p.is_alphanumeric() || p == '_'));
            prop_assert!(!standalone_digit);
        }

        #[test]
        fn prop_truncate_bounded(s in "\\PC{0,100}", max in 3usize..50) {
            let out = truncate_string(&s, max);
            if s.len() <= max {
                prop_assert_eq!(out, s);
            } else {
                prop_assert!(out.len() <= max);
                prop_assert!(out.ends_with("..."));
            }
        }
    }
}
