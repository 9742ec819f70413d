//! In-process connector for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_types::{Column, ColumnType, Value};

use crate::config::Config;
use crate::connection::{Connection, ConnectionError, Connector};
use crate::statement::InsertStatement;

/// Shared knobs and counters for every connection a [`StubConnector`] dials.
#[derive(Debug, Default)]
pub struct Script {
    pub dials: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
    batch_rows: Mutex<Vec<u64>>,
    /// The next operation fails with `Closed` and breaks the link.
    pub break_next: AtomicBool,
    /// Operations never complete.
    pub hang: AtomicBool,
    pub resets: AtomicUsize,
}

impl Script {
    /// Row counts of every batch sent, in order.
    pub fn batches(&self) -> Vec<u64> {
        self.batch_rows.lock().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubConnector {
    pub script: Arc<Script>,
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(
        &self,
        _addr: &str,
        _config: &Config,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        self.script.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection {
            script: Arc::clone(&self.script),
            pending: VecDeque::new(),
            broken: false,
        }))
    }
}

#[derive(Debug)]
struct StubConnection {
    script: Arc<Script>,
    pending: VecDeque<Vec<Value>>,
    broken: bool,
}

impl StubConnection {
    async fn step(&mut self) -> Result<(), ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed);
        }
        if self.script.break_next.swap(false, Ordering::SeqCst) {
            self.broken = true;
            return Err(ConnectionError::Closed);
        }
        if self.script.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn numbers(sql: &str) -> Option<u64> {
    let start = sql.find("numbers(")? + "numbers(".len();
    let end = sql[start..].find(')')? + start;
    sql[start..end].trim().parse().ok()
}

#[async_trait]
impl Connection for StubConnection {
    async fn exec(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.step().await?;
        self.script.statements.lock().push(sql.to_string());
        if sql.starts_with("fail") {
            return Err(ConnectionError::server(62, "syntax error"));
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Column>, ConnectionError> {
        self.step().await?;
        self.script.statements.lock().push(sql.to_string());
        if let Some(count) = numbers(sql) {
            self.pending = (0..count).map(|n| vec![Value::UInt(n)]).collect();
            return Ok(vec![Column::new("number", ColumnType::UInt64)]);
        }
        if sql.contains("empty") {
            self.pending.clear();
        } else {
            self.pending = VecDeque::from([vec![Value::UInt(1)]]);
        }
        Ok(vec![Column::new("1", ColumnType::UInt8)])
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, ConnectionError> {
        self.step().await?;
        Ok(self.pending.pop_front())
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.step().await
    }

    async fn describe_insert(
        &mut self,
        _statement: &InsertStatement,
    ) -> Result<Vec<Column>, ConnectionError> {
        self.step().await?;
        Ok(vec![
            Column::new("id", ColumnType::UInt32),
            Column::new("name", ColumnType::String),
        ])
    }

    async fn send_batch(
        &mut self,
        _statement: &InsertStatement,
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, ConnectionError> {
        self.step().await?;
        let count = rows.len() as u64;
        self.script.batch_rows.lock().push(count);
        Ok(count)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn supports_reset(&self) -> bool {
        true
    }

    async fn reset(&mut self) -> Result<(), ConnectionError> {
        self.script.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
