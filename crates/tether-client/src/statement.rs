//! Statement helpers: insert descriptors and identifier validation.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

#[allow(clippy::expect_used)]
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("valid identifier regex"));

#[allow(clippy::expect_used)]
static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*INSERT\s+INTO\s+([^\s(]+)\s*(?:\(([^)]*)\))?\s*(?:VALUES\s*)?;?\s*$")
        .expect("valid insert regex")
});

#[allow(clippy::expect_used)]
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[0-9]+(?:\.[0-9]+)?$").expect("valid number regex"));

/// Target of a bulk insert: a table and an ordered column list.
///
/// An empty column list means all columns of the table in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
}

impl InsertStatement {
    /// Parse an `INSERT INTO table (a, b, ...)` prefix.
    ///
    /// A trailing `VALUES` keyword is accepted and ignored. The table may be
    /// qualified with a database name.
    pub fn parse(sql: &str) -> Result<Self> {
        let captures = INSERT_RE.captures(sql).ok_or_else(|| {
            Error::InvalidStatement(format!(
                "expected 'INSERT INTO <table> [(<columns>)]', got '{}'",
                sql.trim()
            ))
        })?;

        let table = captures.get(1).map_or("", |m| m.as_str());
        for part in table.split('.') {
            validate_identifier(part)?;
        }

        let columns = match captures.get(2) {
            Some(list) => {
                let columns = list
                    .as_str()
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .collect::<Vec<_>>();
                for column in &columns {
                    validate_identifier(column)?;
                }
                columns
            }
            None => Vec::new(),
        };

        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }

    /// Create a descriptor from parts.
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = table.into();
        for part in table.split('.') {
            validate_identifier(part)?;
        }
        let columns = columns.into_iter().map(Into::into).collect::<Vec<String>>();
        for column in &columns {
            validate_identifier(column)?;
        }
        Ok(Self { table, columns })
    }

    /// Get the target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Get the explicit column list.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", self.table)?;
        if !self.columns.is_empty() {
            write!(f, " ({})", self.columns.join(", "))?;
        }
        Ok(())
    }
}

/// Validate an identifier (table, column or setting name) to prevent SQL injection.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidStatement(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidStatement(format!(
            "invalid identifier '{name}': must start with letter/underscore, \
             contain only alphanumerics/_, and be 1-128 characters"
        )));
    }

    Ok(())
}

/// Render a `SET name = value` statement.
///
/// Plain integer and decimal literals are emitted bare, anything else as a
/// quoted string.
pub(crate) fn set_statement(name: &str, value: &str) -> String {
    if NUMBER_RE.is_match(value) {
        format!("SET {name} = {value}")
    } else {
        format!("SET {name} = '{}'", value.replace('\'', "''"))
    }
}
