//! Forward-only result cursor.

use std::fmt;
use std::sync::Arc;

use tether_types::Column;
use tracing::Instrument;

use crate::error::Result;
use crate::row::{FromRow, Row};
use crate::session::{ConnGuard, SessionInner, deadline};

/// A lazy, forward-only, non-restartable sequence of rows.
///
/// The cursor owns its session's connection until the last row has been
/// read. Read it to the end or call [`close`](Self::close); dropping an
/// unfinished cursor leaves unread rows on the wire, so the session is
/// closed and its connection discarded.
///
/// Closing the session does not interrupt an open cursor. The connection is
/// released once the cursor finishes.
pub struct Rows {
    guard: Option<ConnGuard>,
    session: Arc<SessionInner>,
    columns: Arc<[Column]>,
    span: tracing::Span,
    rows_read: u64,
}

impl Rows {
    pub(crate) fn new(guard: ConnGuard, columns: Vec<Column>, span: tracing::Span) -> Self {
        let session = Arc::clone(guard.session());
        session.set_cursor_open(true);
        Self {
            guard: Some(guard),
            session,
            columns: columns.into(),
            span,
            rows_read: 0,
        }
    }

    /// Get the result columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of rows read so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Check if the cursor has reached the end.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Read the next row, `None` once the result is exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        let Some(guard) = self.guard.as_mut() else {
            return Ok(None);
        };

        let timeout = self.session.command_timeout();
        let result = async {
            match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.next_row()).await,
                Err(e) => Err(e),
            }
        }
        .instrument(self.span.clone())
        .await;

        match guard.settle(result) {
            Ok(Some(values)) => {
                self.rows_read += 1;
                Ok(Some(Row::new(Arc::clone(&self.columns), values)))
            }
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    /// Read the remaining rows and release the connection.
    pub async fn close(mut self) -> Result<()> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    /// Decode every remaining row.
    pub async fn scan_all<T: FromRow>(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            match T::from_row(&row) {
                Ok(value) => out.push(value),
                Err(e) => {
                    self.close().await?;
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    fn finish(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            self.session.set_cursor_open(false);
            let _enter = self.span.enter();
            tracing::trace!(rows = self.rows_read, "cursor finished");
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.poison("cursor dropped before it was exhausted");
            drop(guard);
            self.session.set_cursor_open(false);
        }
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("session_id", &self.session.id())
            .field("columns", &self.columns.len())
            .field("rows_read", &self.rows_read)
            .field("finished", &self.is_finished())
            .finish()
    }
}
