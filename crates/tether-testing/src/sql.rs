//! The statement dialect understood by the mock server.
//!
//! This is a handful of regular expressions, not a parser. It covers what
//! session tests need: role and setting changes, table DDL, and simple
//! single-table selects.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use tether_client::ConnectionError;
use tether_types::{Column, ColumnType, Value};

/// Server error codes reported by the mock.
pub mod codes {
    /// Statement could not be understood.
    pub const SYNTAX_ERROR: i32 = 62;
    /// Unknown column referenced.
    pub const UNKNOWN_IDENTIFIER: i32 = 47;
    /// Unknown table referenced.
    pub const UNKNOWN_TABLE: i32 = 60;
    /// Table already exists.
    pub const TABLE_ALREADY_EXISTS: i32 = 57;
    /// Unknown column type.
    pub const UNKNOWN_TYPE: i32 = 50;
    /// Value does not fit the column.
    pub const TYPE_MISMATCH: i32 = 53;
    /// Unknown setting.
    pub const UNKNOWN_SETTING: i32 = 115;
    /// Unknown role.
    pub const UNKNOWN_ROLE: i32 = 511;
    /// Login rejected.
    pub const AUTHENTICATION_FAILED: i32 = 516;
    /// Plain column mixed with an aggregate.
    pub const NOT_AN_AGGREGATE: i32 = 215;
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        #[allow(clippy::expect_used)]
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid statement regex"));
    };
}

pattern!(SET_ROLE_RE, r"(?i)^\s*SET\s+ROLE\s+([A-Za-z_][A-Za-z0-9_]*)\s*;?\s*$");
pattern!(SET_RE, r"(?i)^\s*SET\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+?)\s*;?\s*$");
pattern!(
    CREATE_RE,
    r"(?is)^\s*CREATE\s+(TEMPORARY\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?([A-Za-z0-9_.]+)\s*\((.*?)\)\s*(?:ENGINE\s*=\s*\w+(?:\(\))?(?:\s+ORDER\s+BY\s+\w+)?)?\s*;?\s*$"
);
pattern!(
    DROP_RE,
    r"(?i)^\s*DROP\s+(?:TEMPORARY\s+)?TABLE\s+(IF\s+EXISTS\s+)?([A-Za-z0-9_.]+)\s*;?\s*$"
);
pattern!(TRUNCATE_RE, r"(?i)^\s*TRUNCATE\s+(?:TABLE\s+)?([A-Za-z0-9_.]+)\s*;?\s*$");
pattern!(SHOW_ROLES_RE, r"(?i)^\s*SHOW\s+ROLES\s*;?\s*$");
pattern!(
    SELECT_RE,
    r"(?is)^\s*SELECT\s+(.+?)(?:\s+FROM\s+([A-Za-z0-9_.]+(?:\(\s*\d+\s*\))?))?(?:\s+WHERE\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*('(?:[^']|'')*'|-?\d+))?(?:\s+ORDER\s+BY\s+([A-Za-z_][A-Za-z0-9_]*))?\s*;?\s*$"
);
pattern!(COLUMN_DEF_RE, r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s+(.+?)\s*$");
pattern!(NUMBERS_RE, r"(?i)^numbers\(\s*(\d+)\s*\)$");
pattern!(GET_SETTING_RE, r"(?i)^getSetting\(\s*'([^']*)'\s*\)$");
pattern!(SLEEP_RE, r"(?i)^sleep(?:EachRow)?\(\s*(\d+(?:\.\d+)?)\s*\)$");
pattern!(COUNT_RE, r"(?i)^count\(\s*\*?\s*\)$");
pattern!(IDENT_RE, r"^[A-Za-z_][A-Za-z0-9_]*$");

/// A recognized statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    /// `SET ROLE name`; `None` for `NONE` or `DEFAULT`.
    SetRole(Option<String>),
    SetSetting {
        name: String,
        value: String,
    },
    CreateTable {
        temporary: bool,
        if_not_exists: bool,
        name: String,
        columns: Vec<Column>,
    },
    DropTable {
        if_exists: bool,
        name: String,
    },
    Truncate(String),
    ShowRoles,
    Select(Select),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub projection: Vec<Expr>,
    pub from: Option<Source>,
    pub filter: Option<(String, Value)>,
    pub order_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Source {
    Table(String),
    Numbers(u64),
    Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Star,
    Count,
    CurrentRole,
    CurrentUser,
    HostName,
    GetSetting(String),
    Sleep(f64),
    Literal(Value),
    Column(String),
}

impl Expr {
    /// Result column name.
    pub(crate) fn name(&self) -> String {
        match self {
            Self::Star => "*".to_string(),
            Self::Count => "count()".to_string(),
            Self::CurrentRole => "currentRole()".to_string(),
            Self::CurrentUser => "currentUser()".to_string(),
            Self::HostName => "hostName()".to_string(),
            Self::GetSetting(name) => format!("getSetting('{name}')"),
            Self::Sleep(seconds) => format!("sleep({seconds})"),
            Self::Literal(Value::String(s)) => format!("'{s}'"),
            Self::Literal(value) => value.to_string(),
            Self::Column(name) => name.clone(),
        }
    }

    /// Result column for this expression, given the source columns.
    pub(crate) fn column(&self, source: &[Column]) -> Result<Column, ConnectionError> {
        let column_type = match self {
            Self::Count => ColumnType::UInt64,
            Self::CurrentRole | Self::CurrentUser | Self::HostName | Self::GetSetting(_) => {
                ColumnType::String
            }
            Self::Sleep(_) => ColumnType::UInt8,
            Self::Literal(Value::Int(_)) => ColumnType::Int64,
            Self::Literal(Value::UInt(_)) => ColumnType::UInt64,
            Self::Literal(_) => ColumnType::String,
            Self::Column(name) => return find_column(source, name).map(|i| source[i].clone()),
            Self::Star => return Err(syntax("'*' cannot be named")),
        };
        Ok(Column::new(self.name(), column_type))
    }
}

pub(crate) fn syntax(message: impl Into<String>) -> ConnectionError {
    ConnectionError::server(codes::SYNTAX_ERROR, message)
}

pub(crate) fn find_column(columns: &[Column], name: &str) -> Result<usize, ConnectionError> {
    columns.iter().position(|c| c.name == name).ok_or_else(|| {
        ConnectionError::server(
            codes::UNKNOWN_IDENTIFIER,
            format!("Missing columns: '{name}'"),
        )
    })
}

/// Strip an optional database prefix.
pub(crate) fn table_key(name: &str) -> String {
    name.rsplit_once('.').map_or(name, |(_, table)| table).to_string()
}

/// Recognize a statement.
pub(crate) fn parse(sql: &str) -> Result<Command, ConnectionError> {
    if let Some(caps) = SET_ROLE_RE.captures(sql) {
        let role = &caps[1];
        let role = if role.eq_ignore_ascii_case("NONE") || role.eq_ignore_ascii_case("DEFAULT") {
            None
        } else {
            Some(role.to_string())
        };
        return Ok(Command::SetRole(role));
    }

    if let Some(caps) = SET_RE.captures(sql) {
        return Ok(Command::SetSetting {
            name: caps[1].to_string(),
            value: unquote(&caps[2]),
        });
    }

    if let Some(caps) = CREATE_RE.captures(sql) {
        let columns = split_top_level(&caps[4])
            .into_iter()
            .map(parse_column_def)
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(syntax("table must have at least one column"));
        }
        return Ok(Command::CreateTable {
            temporary: caps.get(1).is_some(),
            if_not_exists: caps.get(2).is_some(),
            name: table_key(&caps[3]),
            columns,
        });
    }

    if let Some(caps) = DROP_RE.captures(sql) {
        return Ok(Command::DropTable {
            if_exists: caps.get(1).is_some(),
            name: table_key(&caps[2]),
        });
    }

    if let Some(caps) = TRUNCATE_RE.captures(sql) {
        return Ok(Command::Truncate(table_key(&caps[1])));
    }

    if SHOW_ROLES_RE.is_match(sql) {
        return Ok(Command::ShowRoles);
    }

    if let Some(caps) = SELECT_RE.captures(sql) {
        let projection = split_top_level(&caps[1])
            .into_iter()
            .map(parse_expr)
            .collect::<Result<Vec<_>, _>>()?;
        let from = caps.get(2).map(|m| parse_source(m.as_str()));
        let filter = match (caps.get(3), caps.get(4)) {
            (Some(column), Some(value)) => Some((column.as_str().to_string(), literal(value.as_str())?)),
            _ => None,
        };
        return Ok(Command::Select(Select {
            projection,
            from,
            filter,
            order_by: caps.get(5).map(|m| m.as_str().to_string()),
        }));
    }

    Err(syntax(format!("Syntax error: failed at '{}'", sql.trim())))
}

/// Split on commas outside parentheses and quotes.
pub(crate) fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;

    for (i, ch) in list.char_indices() {
        match ch {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = list[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_column_def(def: &str) -> Result<Column, ConnectionError> {
    let caps = COLUMN_DEF_RE
        .captures(def)
        .ok_or_else(|| syntax(format!("bad column definition '{def}'")))?;
    let column_type = ColumnType::from_type_name(&caps[2]).ok_or_else(|| {
        ConnectionError::server(
            codes::UNKNOWN_TYPE,
            format!("Unknown data type family: {}", &caps[2]),
        )
    })?;
    Ok(Column::new(&caps[1], column_type))
}

fn parse_source(text: &str) -> Source {
    if let Some(caps) = NUMBERS_RE.captures(text) {
        return Source::Numbers(caps[1].parse().unwrap_or(0));
    }
    if text.eq_ignore_ascii_case("system.settings") {
        return Source::Settings;
    }
    Source::Table(table_key(text))
}

fn parse_expr(text: &str) -> Result<Expr, ConnectionError> {
    if text == "*" {
        return Ok(Expr::Star);
    }
    if COUNT_RE.is_match(text) {
        return Ok(Expr::Count);
    }
    if text.eq_ignore_ascii_case("currentRole()") {
        return Ok(Expr::CurrentRole);
    }
    if text.eq_ignore_ascii_case("currentUser()") {
        return Ok(Expr::CurrentUser);
    }
    if text.eq_ignore_ascii_case("hostName()") {
        return Ok(Expr::HostName);
    }
    if let Some(caps) = GET_SETTING_RE.captures(text) {
        return Ok(Expr::GetSetting(caps[1].to_string()));
    }
    if let Some(caps) = SLEEP_RE.captures(text) {
        let seconds = caps[1]
            .parse()
            .map_err(|_| syntax(format!("bad sleep argument '{}'", &caps[1])))?;
        return Ok(Expr::Sleep(seconds));
    }
    if IDENT_RE.is_match(text) {
        return Ok(Expr::Column(text.to_string()));
    }
    literal(text).map(Expr::Literal)
}

fn literal(text: &str) -> Result<Value, ConnectionError> {
    if text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2 {
        return Ok(Value::String(unquote(text)));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Ok(Value::UInt(n));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    Err(syntax(format!("Unrecognized expression '{text}'")))
}

fn unquote(text: &str) -> String {
    match text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => text.to_string(),
    }
}

/// Total order over values, used by `ORDER BY` and `WHERE`.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::UInt(x), Value::Int(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        _ => a.type_name().cmp(b.type_name()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_role() {
        assert_eq!(
            parse("SET ROLE analyst").unwrap(),
            Command::SetRole(Some("analyst".into()))
        );
        assert_eq!(parse("set role NONE;").unwrap(), Command::SetRole(None));
    }

    #[test]
    fn test_set_setting_unquotes() {
        assert_eq!(
            parse("SET max_execution_time = 60").unwrap(),
            Command::SetSetting {
                name: "max_execution_time".into(),
                value: "60".into()
            }
        );
        assert_eq!(
            parse("SET log_comment = 'it''s'").unwrap(),
            Command::SetSetting {
                name: "log_comment".into(),
                value: "it's".into()
            }
        );
    }

    #[test]
    fn test_create_table_with_nested_types() {
        let command = parse(
            "CREATE TABLE IF NOT EXISTS default.session_test (id UInt32, name Nullable(String), \
             created_at DateTime64(3, 'UTC')) ENGINE = Memory",
        )
        .unwrap();
        let Command::CreateTable {
            temporary,
            if_not_exists,
            name,
            columns,
        } = command
        else {
            unreachable!("expected CREATE TABLE");
        };
        assert!(!temporary);
        assert!(if_not_exists);
        assert_eq!(name, "session_test");
        assert_eq!(columns.len(), 3);
        assert_eq!(
            columns[1].column_type,
            ColumnType::Nullable(Box::new(ColumnType::String))
        );
        assert_eq!(columns[2].column_type, ColumnType::DateTime);
    }

    #[test]
    fn test_temporary_table() {
        let command = parse("CREATE TEMPORARY TABLE scratch (n UInt64)").unwrap();
        assert!(matches!(command, Command::CreateTable { temporary: true, .. }));
    }

    #[test]
    fn test_select_forms() {
        let Command::Select(select) = parse("SELECT currentRole()").unwrap() else {
            unreachable!("expected SELECT");
        };
        assert_eq!(select.projection, [Expr::CurrentRole]);
        assert!(select.from.is_none());

        let Command::Select(select) = parse("SELECT number FROM numbers(5)").unwrap() else {
            unreachable!("expected SELECT");
        };
        assert_eq!(select.from, Some(Source::Numbers(5)));

        let Command::Select(select) =
            parse("SELECT value FROM system.settings WHERE name = 'max_threads'").unwrap()
        else {
            unreachable!("expected SELECT");
        };
        assert_eq!(select.from, Some(Source::Settings));
        assert_eq!(
            select.filter,
            Some(("name".into(), Value::String("max_threads".into())))
        );

        let Command::Select(select) = parse("SELECT id, name FROM t ORDER BY id").unwrap() else {
            unreachable!("expected SELECT");
        };
        assert_eq!(select.order_by.as_deref(), Some("id"));
        assert_eq!(select.projection.len(), 2);
    }

    #[test]
    fn test_unknown_statement_is_syntax_error() {
        let err = parse("EXPLAIN SELECT 1").unwrap_err();
        assert!(matches!(err, ConnectionError::Server { code: codes::SYNTAX_ERROR, .. }));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a UInt8, b Nullable(String), c DateTime64(3, 'UTC')"),
            ["a UInt8", "b Nullable(String)", "c DateTime64(3, 'UTC')"]
        );
        assert_eq!(split_top_level("'a,b', 1"), ["'a,b'", "1"]);
    }

    #[test]
    fn test_compare_mixed_integers() {
        assert_eq!(compare(&Value::Int(-1), &Value::UInt(0)), Ordering::Less);
        assert_eq!(compare(&Value::UInt(3), &Value::Int(3)), Ordering::Equal);
        assert_eq!(compare(&Value::Null, &Value::UInt(0)), Ordering::Less);
    }
}
