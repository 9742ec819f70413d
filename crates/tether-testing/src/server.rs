//! Shared state of the mock server.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_types::{Column, Value};

use crate::connection::MockConnector;

/// Role reported by `currentRole()` before any `SET ROLE`.
pub const DEFAULT_ROLE: &str = "default";

/// Settings every connection starts with.
const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("max_execution_time", "0"),
    ("max_threads", "8"),
    ("readonly", "0"),
    ("join_use_nulls", "0"),
    ("log_comment", ""),
];

/// A table: column layout and rows in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

/// An in-memory server shared by every connection dialed through its
/// [`MockConnector`].
///
/// Tables are shared across connections. Role, settings and temporary
/// tables belong to a single connection and vanish on reset, which is what
/// makes connection pinning observable in tests.
///
/// # Example
///
/// ```rust,ignore
/// let server = MockServer::new();
/// server.add_role("analyst");
/// let client = Client::open(Config::new(), server.connector()).await?;
/// ```
#[derive(Clone, Default)]
pub struct MockServer {
    inner: Arc<ServerInner>,
}

#[derive(Default)]
struct ServerInner {
    users: Mutex<BTreeMap<String, String>>,
    roles: Mutex<BTreeSet<String>>,
    settings: Mutex<BTreeMap<String, String>>,
    tables: Mutex<BTreeMap<String, Table>>,
    refused: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    drop_next: AtomicBool,
    next_connection_id: AtomicU64,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    connections_opened: AtomicU64,
    connections_open: AtomicU64,
    failed_logins: AtomicU64,
    statements: AtomicU64,
    pings: AtomicU64,
    resets: AtomicU64,
    batches: AtomicU64,
    rows_inserted: AtomicU64,
}

/// Snapshot of server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Connections accepted since start.
    pub connections_opened: u64,
    /// Connections currently alive.
    pub connections_open: u64,
    /// Rejected logins.
    pub failed_logins: u64,
    /// Statements executed or queried.
    pub statements: u64,
    /// Pings answered.
    pub pings: u64,
    /// Connection resets.
    pub resets: u64,
    /// Bulk inserts received.
    pub batches: u64,
    /// Rows written by bulk inserts.
    pub rows_inserted: u64,
}

impl MockServer {
    /// Create a server with user `default` (empty password) and no roles.
    #[must_use]
    pub fn new() -> Self {
        let server = Self::default();
        server.add_user("default", "");
        {
            let mut settings = server.inner.settings.lock();
            for (name, value) in DEFAULT_SETTINGS {
                settings.insert((*name).to_string(), (*value).to_string());
            }
        }
        server
    }

    /// Get a connector that dials this server.
    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector::new(self.clone())
    }

    /// Register a user.
    pub fn add_user(&self, name: &str, password: &str) {
        self.inner
            .users
            .lock()
            .insert(name.to_string(), password.to_string());
    }

    /// Register a role that `SET ROLE` may switch to.
    pub fn add_role(&self, name: &str) {
        self.inner.roles.lock().insert(name.to_string());
    }

    /// Register a setting and its default.
    pub fn add_setting(&self, name: &str, default: &str) {
        self.inner
            .settings
            .lock()
            .insert(name.to_string(), default.to_string());
    }

    /// Refuse dials to `addr`.
    pub fn refuse(&self, addr: &str) {
        self.inner.refused.lock().insert(addr.to_string());
    }

    /// Accept dials to `addr` again.
    pub fn accept(&self, addr: &str) {
        self.inner.refused.lock().remove(addr);
    }

    /// Delay every dial and operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Drop the link under the next operation on any connection.
    pub fn drop_next_operation(&self) {
        self.inner.drop_next.store(true, Ordering::SeqCst);
    }

    /// Get a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let c = &self.inner.counters;
        ServerStats {
            connections_opened: c.connections_opened.load(Ordering::SeqCst),
            connections_open: c.connections_open.load(Ordering::SeqCst),
            failed_logins: c.failed_logins.load(Ordering::SeqCst),
            statements: c.statements.load(Ordering::SeqCst),
            pings: c.pings.load(Ordering::SeqCst),
            resets: c.resets.load(Ordering::SeqCst),
            batches: c.batches.load(Ordering::SeqCst),
            rows_inserted: c.rows_inserted.load(Ordering::SeqCst),
        }
    }

    /// Get the rows of a shared table, `None` if it does not exist.
    #[must_use]
    pub fn table_rows(&self, name: &str) -> Option<Vec<Vec<Value>>> {
        self.inner.tables.lock().get(name).map(|t| t.rows.clone())
    }

    /// Get the names of all shared tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.inner.tables.lock().keys().cloned().collect()
    }

    // Connection-side hooks.

    pub(crate) fn is_refused(&self, addr: &str) -> bool {
        self.inner.refused.lock().contains(addr)
    }

    pub(crate) fn authenticate(&self, user: &str, password: &str) -> bool {
        let ok = self
            .inner
            .users
            .lock()
            .get(user)
            .is_some_and(|expected| expected == password);
        if !ok {
            self.inner
                .counters
                .failed_logins
                .fetch_add(1, Ordering::SeqCst);
        }
        ok
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        *self.inner.latency.lock()
    }

    pub(crate) fn take_drop(&self) -> bool {
        self.inner.drop_next.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn has_role(&self, role: &str) -> bool {
        self.inner.roles.lock().contains(role)
    }

    pub(crate) fn roles(&self) -> Vec<String> {
        self.inner.roles.lock().iter().cloned().collect()
    }

    pub(crate) fn default_settings(&self) -> BTreeMap<String, String> {
        self.inner.settings.lock().clone()
    }

    pub(crate) fn opened(&self) -> u64 {
        let c = &self.inner.counters;
        c.connections_opened.fetch_add(1, Ordering::SeqCst);
        c.connections_open.fetch_add(1, Ordering::SeqCst);
        self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn closed(&self) {
        self.inner
            .counters
            .connections_open
            .fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn count_statement(&self) {
        self.inner.counters.statements.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_ping(&self) {
        self.inner.counters.pings.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_reset(&self) {
        self.inner.counters.resets.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_batch(&self, rows: u64) {
        let c = &self.inner.counters;
        c.batches.fetch_add(1, Ordering::SeqCst);
        c.rows_inserted.fetch_add(rows, Ordering::SeqCst);
    }

    /// Run `f` against the shared table map.
    pub(crate) fn with_tables<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Table>) -> T) -> T {
        f(&mut self.inner.tables.lock())
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("tables", &self.table_names())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
