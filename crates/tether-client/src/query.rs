//! Single-row queries.

use crate::client::Client;
use crate::error::{Error, Result};
use crate::row::{FromRow, Row};
use crate::rows::Rows;
use crate::session::Session;

enum Source<'a> {
    Session(&'a Session),
    Client(&'a Client),
}

/// A query whose first row is decoded on demand.
///
/// Returned by [`Session::query_row`] and [`Client::query_row`]. The
/// statement runs when [`scan`](Self::scan) or [`row`](Self::row) is
/// awaited; any further rows are read and discarded.
#[must_use = "the query does not run until `scan` or `row` is awaited"]
pub struct QueryRow<'a> {
    source: Source<'a>,
    sql: String,
}

impl<'a> QueryRow<'a> {
    pub(crate) fn session(session: &'a Session, sql: &str) -> Self {
        Self {
            source: Source::Session(session),
            sql: sql.to_string(),
        }
    }

    pub(crate) fn client(client: &'a Client, sql: &str) -> Self {
        Self {
            source: Source::Client(client),
            sql: sql.to_string(),
        }
    }

    /// Get the statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run the query and return its first row.
    ///
    /// Fails with [`Error::NoRows`] when the result is empty.
    pub async fn row(self) -> Result<Row> {
        let mut rows: Rows = match self.source {
            Source::Session(session) => session.query(&self.sql).await?,
            Source::Client(client) => client.query(&self.sql).await?,
        };
        let first = rows.next().await?;
        rows.close().await?;
        first.ok_or(Error::NoRows)
    }

    /// Run the query and decode its first row.
    pub async fn scan<T: FromRow>(self) -> Result<T> {
        let row = self.row().await?;
        T::from_row(&row)
    }
}
