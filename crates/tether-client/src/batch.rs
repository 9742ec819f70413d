//! Buffered bulk insert.

use std::fmt;
use std::sync::Arc;

use tether_types::{Column, Value};
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::instrumentation::span_names;
use crate::row::ToRow;
use crate::session::{Session, SessionInner, deadline};
use crate::statement::InsertStatement;

/// Client-side row buffer flushed as one bulk insert.
///
/// Rows are validated against the insert's column list as they are
/// appended; nothing touches the network until [`send`](Self::send).
///
/// # Example
///
/// ```rust,ignore
/// let mut batch = session
///     .prepare_batch("INSERT INTO session_test (id, name, created_at)")
///     .await?;
/// for i in 0..3u32 {
///     batch.append((i, format!("row {i}"), now))?;
/// }
/// batch.send().await?;
/// ```
pub struct Batch {
    session: Arc<SessionInner>,
    statement: InsertStatement,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    sent: bool,
    /// Keeps a pooled session alive for batches prepared on the client.
    owner: Option<Session>,
}

impl Batch {
    pub(crate) fn new(
        session: Arc<SessionInner>,
        statement: InsertStatement,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            session,
            statement,
            columns,
            rows: Vec::new(),
            sent: false,
            owner: None,
        }
    }

    pub(crate) fn owned_by(mut self, session: Session) -> Self {
        self.owner = Some(session);
        self
    }

    /// Get the insert target.
    #[must_use]
    pub fn statement(&self) -> &InsertStatement {
        &self.statement
    }

    /// Get the target columns in append order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of buffered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check if the batch has been sent.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Buffer one row.
    ///
    /// Values must be in column order. Fails with [`Error::ColumnMismatch`]
    /// when the value count differs from the column count, and with
    /// [`Error::ColumnType`] when a value cannot be stored in its column.
    pub fn append<R: ToRow>(&mut self, row: R) -> Result<()> {
        if self.sent {
            return Err(Error::BatchAlreadySent);
        }

        let values = row.to_row();
        if values.len() != self.columns.len() {
            return Err(Error::ColumnMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }

        for (column, value) in self.columns.iter().zip(&values) {
            if !column.column_type.accepts(value) {
                return Err(Error::ColumnType {
                    column: column.name.clone(),
                    expected: column.column_type.to_string(),
                    actual: value.type_name().to_string(),
                });
            }
        }

        self.rows.push(values);
        Ok(())
    }

    /// Transmit all buffered rows in one request.
    ///
    /// Returns the number of rows written. The batch is consumed by the
    /// first send that reaches the connection, whether or not it succeeds;
    /// rows are never resent, so after a failure prepare a new batch.
    pub async fn send(&mut self) -> Result<u64> {
        if self.sent {
            return Err(Error::BatchAlreadySent);
        }

        let mut guard = self.session.begin(true)?;
        self.sent = true;
        let rows = std::mem::take(&mut self.rows);
        let span = tracing::debug_span!(
            span_names::BATCH_SEND,
            session_id = %self.session.id(),
            connection_id = self.session.connection_id(),
            table = %self.statement.table(),
            rows = rows.len()
        );

        let timeout = self.session.command_timeout();
        let statement = &self.statement;
        async {
            let result = match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.send_batch(statement, rows)).await,
                Err(e) => Err(e),
            };
            let result = guard.settle(result);
            if let Ok(written) = &result {
                tracing::debug!(rows = *written, "batch sent");
            }
            result
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("statement", &self.statement.to_string())
            .field("columns", &self.columns.len())
            .field("rows", &self.rows.len())
            .field("sent", &self.sent)
            .field("pooled", &self.owner.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::Client;
    use crate::config::Config;
    use crate::test_support::StubConnector;

    async fn session() -> (Client, Session, StubConnector) {
        let connector = StubConnector::default();
        let client = Client::open(Config::new(), connector.clone()).await.unwrap();
        let session = client.acquire_session().await.unwrap();
        (client, session, connector)
    }

    #[tokio::test]
    async fn test_append_validates_arity_and_type() {
        let (_client, session, connector) = session().await;
        let mut batch = session.prepare_batch("INSERT INTO t (id, name)").await.unwrap();
        assert_eq!(batch.columns().len(), 2);

        batch.append((1u32, "a")).unwrap();
        assert!(matches!(
            batch.append((2u32,)),
            Err(Error::ColumnMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            batch.append(("x", "b")),
            Err(Error::ColumnType { ref column, .. }) if column == "id"
        ));
        assert!(matches!(
            batch.append((u64::MAX, "c")),
            Err(Error::ColumnType { .. })
        ));
        assert_eq!(batch.len(), 1);
        assert!(connector.script.batches().is_empty());
    }

    #[tokio::test]
    async fn test_send_once() {
        let (_client, session, connector) = session().await;
        let mut batch = session.prepare_batch("INSERT INTO t (id, name)").await.unwrap();
        batch.append((1u32, "a")).unwrap();
        batch.append(vec![Value::UInt(2), Value::String("b".into())]).unwrap();

        assert_eq!(batch.send().await.unwrap(), 2);
        assert!(batch.is_sent());
        assert!(matches!(batch.send().await, Err(Error::BatchAlreadySent)));
        assert!(matches!(batch.append((3u32, "c")), Err(Error::BatchAlreadySent)));
        assert_eq!(connector.script.batches(), [2]);
    }

    #[tokio::test]
    async fn test_failed_send_is_not_retried() {
        let (_client, session, connector) = session().await;
        let mut batch = session.prepare_batch("INSERT INTO t (id, name)").await.unwrap();
        batch.append((1u32, "a")).unwrap();

        connector.script.break_next.store(true, Ordering::SeqCst);
        assert!(batch.send().await.is_err());
        assert!(matches!(batch.send().await, Err(Error::BatchAlreadySent)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_session_close() {
        let (_client, session, _) = session().await;
        let mut batch = session.prepare_batch("INSERT INTO t (id, name)").await.unwrap();
        batch.append((1u32, "a")).unwrap();
        session.close().unwrap();

        assert!(matches!(batch.send().await, Err(Error::SessionClosed)));
        assert!(!batch.is_sent());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_statement() {
        let (_client, session, _) = session().await;
        assert!(matches!(
            session.prepare_batch("DELETE FROM t").await,
            Err(Error::InvalidStatement(_))
        ));
    }
}
