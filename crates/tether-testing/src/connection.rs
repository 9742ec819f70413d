//! Mock physical connections.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tether_client::{Config, Connection, ConnectionError, Connector, InsertStatement};
use tether_types::{Column, ColumnType, Value};

use crate::server::{DEFAULT_ROLE, MockServer, Table};
use crate::sql::{self, Command, Expr, Select, Source, codes, compare, find_column, table_key};

/// Dials connections to a [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    pub(crate) fn new(server: MockServer) -> Self {
        Self { server }
    }

    /// Get the server this connector dials.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        addr: &str,
        config: &Config,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        if let Some(latency) = self.server.latency() {
            tokio::time::sleep(latency).await;
        }
        if self.server.is_refused(addr) {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused by {addr}"),
            )));
        }
        if !self.server.authenticate(&config.username, &config.password) {
            return Err(ConnectionError::server(
                codes::AUTHENTICATION_FAILED,
                format!(
                    "{}: Authentication failed: password is incorrect, or there is no user with such name",
                    config.username
                ),
            ));
        }

        let id = self.server.opened();
        tracing::trace!(connection_id = id, address = %addr, "mock connection accepted");
        Ok(Box::new(MockConnection {
            server: self.server.clone(),
            id,
            address: addr.to_string(),
            user: config.username.clone(),
            role: None,
            settings: self.server.default_settings(),
            temp_tables: BTreeMap::new(),
            pending: VecDeque::new(),
            broken: false,
        }))
    }
}

/// One link to a [`MockServer`] with its own role, settings and temporary
/// tables.
///
/// Enforces the single-stream rule: issuing anything but `next_row` while
/// a result is still being read breaks the link with a protocol error.
#[derive(Debug)]
pub struct MockConnection {
    server: MockServer,
    id: u64,
    address: String,
    user: String,
    role: Option<String>,
    settings: BTreeMap<String, String>,
    temp_tables: BTreeMap<String, Table>,
    pending: VecDeque<Vec<Value>>,
    broken: bool,
}

#[derive(Default)]
struct Output {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    sleep: Duration,
}

impl MockConnection {
    /// Gate every request: injected faults, latency and stream state.
    async fn step(&mut self, reading_rows: bool) -> Result<(), ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed);
        }
        if self.server.take_drop() {
            self.broken = true;
            tracing::trace!(connection_id = self.id, "mock connection dropped");
            return Err(ConnectionError::Closed);
        }
        if let Some(latency) = self.server.latency() {
            tokio::time::sleep(latency).await;
        }
        if !reading_rows && !self.pending.is_empty() {
            self.broken = true;
            return Err(ConnectionError::Protocol(
                "new request while a result is still being read".into(),
            ));
        }
        Ok(())
    }

    async fn run(&mut self, sql: &str) -> Result<Output, ConnectionError> {
        self.step(false).await?;
        self.server.count_statement();
        let output = self.apply(sql::parse(sql)?)?;
        if !output.sleep.is_zero() {
            tokio::time::sleep(output.sleep).await;
        }
        Ok(output)
    }

    fn apply(&mut self, command: Command) -> Result<Output, ConnectionError> {
        match command {
            Command::SetRole(None) => self.role = None,
            Command::SetRole(Some(role)) => {
                if !self.server.has_role(&role) {
                    return Err(ConnectionError::server(
                        codes::UNKNOWN_ROLE,
                        format!("Role {role} should be granted to set as a current role"),
                    ));
                }
                self.role = Some(role);
            }
            Command::SetSetting { name, value } => {
                let Some(slot) = self.settings.get_mut(&name) else {
                    return Err(unknown_setting(&name));
                };
                *slot = value;
            }
            Command::CreateTable {
                temporary,
                if_not_exists,
                name,
                columns,
            } => {
                let table = Table {
                    columns,
                    rows: Vec::new(),
                };
                if temporary {
                    create(&mut self.temp_tables, name, table, if_not_exists)?;
                } else {
                    self.server
                        .with_tables(|tables| create(tables, name, table, if_not_exists))?;
                }
            }
            Command::DropTable { if_exists, name } => {
                let dropped = self.temp_tables.remove(&name).is_some()
                    || self
                        .server
                        .with_tables(|tables| tables.remove(&name).is_some());
                if !dropped && !if_exists {
                    return Err(unknown_table(&name));
                }
            }
            Command::Truncate(name) => {
                if let Some(table) = self.temp_tables.get_mut(&name) {
                    table.rows.clear();
                } else {
                    self.server.with_tables(|tables| match tables.get_mut(&name) {
                        Some(table) => {
                            table.rows.clear();
                            Ok(())
                        }
                        None => Err(unknown_table(&name)),
                    })?;
                }
            }
            Command::ShowRoles => {
                return Ok(Output {
                    columns: vec![Column::new("name", ColumnType::String)],
                    rows: self
                        .server
                        .roles()
                        .into_iter()
                        .map(|role| vec![Value::String(role)])
                        .collect(),
                    sleep: Duration::ZERO,
                });
            }
            Command::Select(select) => return self.select(select),
        }
        Ok(Output::default())
    }

    fn select(&self, select: Select) -> Result<Output, ConnectionError> {
        let (source_columns, mut rows) = self.source(select.from.as_ref())?;

        if let Some((column, value)) = &select.filter {
            let idx = find_column(&source_columns, column)?;
            rows.retain(|row| compare(&row[idx], value).is_eq());
        }
        if let Some(column) = &select.order_by {
            let idx = find_column(&source_columns, column)?;
            rows.sort_by(|a, b| compare(&a[idx], &b[idx]));
        }

        let mut projection = Vec::new();
        for expr in select.projection {
            if expr == Expr::Star {
                projection.extend(source_columns.iter().map(|c| Expr::Column(c.name.clone())));
            } else {
                projection.push(expr);
            }
        }

        let columns = projection
            .iter()
            .map(|expr| expr.column(&source_columns))
            .collect::<Result<Vec<_>, _>>()?;
        let sleep = projection
            .iter()
            .map(|expr| match expr {
                Expr::Sleep(seconds) => Duration::from_secs_f64(*seconds),
                _ => Duration::ZERO,
            })
            .sum::<Duration>();

        let rows = if projection.contains(&Expr::Count) {
            if let Some(Expr::Column(name)) = projection.iter().find(|e| matches!(e, Expr::Column(_))) {
                return Err(ConnectionError::server(
                    codes::NOT_AN_AGGREGATE,
                    format!("Column {name} is not under aggregate function"),
                ));
            }
            let count = rows.len() as u64;
            let row = projection
                .iter()
                .map(|expr| match expr {
                    Expr::Count => Ok(Value::UInt(count)),
                    other => self.eval(other, &[], &source_columns),
                })
                .collect::<Result<Vec<_>, _>>()?;
            vec![row]
        } else {
            rows.iter()
                .map(|row| {
                    projection
                        .iter()
                        .map(|expr| self.eval(expr, row, &source_columns))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Output {
            columns,
            rows,
            sleep,
        })
    }

    fn source(&self, from: Option<&Source>) -> Result<(Vec<Column>, Vec<Vec<Value>>), ConnectionError> {
        match from {
            None => Ok((Vec::new(), vec![Vec::new()])),
            Some(Source::Numbers(count)) => Ok((
                vec![Column::new("number", ColumnType::UInt64)],
                (0..*count).map(|n| vec![Value::UInt(n)]).collect(),
            )),
            Some(Source::Settings) => Ok((
                vec![
                    Column::new("name", ColumnType::String),
                    Column::new("value", ColumnType::String),
                ],
                self.settings
                    .iter()
                    .map(|(name, value)| {
                        vec![Value::String(name.clone()), Value::String(value.clone())]
                    })
                    .collect(),
            )),
            Some(Source::Table(name)) => {
                if let Some(table) = self.temp_tables.get(name) {
                    return Ok((table.columns.clone(), table.rows.clone()));
                }
                self.server.with_tables(|tables| {
                    tables
                        .get(name)
                        .map(|t| (t.columns.clone(), t.rows.clone()))
                        .ok_or_else(|| unknown_table(name))
                })
            }
        }
    }

    fn eval(&self, expr: &Expr, row: &[Value], columns: &[Column]) -> Result<Value, ConnectionError> {
        Ok(match expr {
            Expr::CurrentRole => {
                Value::String(self.role.as_deref().unwrap_or(DEFAULT_ROLE).to_string())
            }
            Expr::CurrentUser => Value::String(self.user.clone()),
            Expr::HostName => Value::String(self.address.clone()),
            Expr::GetSetting(name) => self
                .settings
                .get(name)
                .cloned()
                .map(Value::String)
                .ok_or_else(|| unknown_setting(name))?,
            Expr::Sleep(_) => Value::UInt(0),
            Expr::Literal(value) => value.clone(),
            Expr::Column(name) => row[find_column(columns, name)?].clone(),
            Expr::Star | Expr::Count => return Err(sql::syntax("aggregate outside projection")),
        })
    }

    /// Resolve the table an insert targets and where each column lands.
    fn insert_layout(&self, statement: &InsertStatement) -> Result<(Vec<Column>, Vec<usize>), ConnectionError> {
        let name = table_key(statement.table());
        let columns = match self.temp_tables.get(&name) {
            Some(table) => table.columns.clone(),
            None => self.server.with_tables(|tables| {
                tables
                    .get(&name)
                    .map(|t| t.columns.clone())
                    .ok_or_else(|| unknown_table(&name))
            })?,
        };

        let positions = if statement.columns().is_empty() {
            (0..columns.len()).collect()
        } else {
            statement
                .columns()
                .iter()
                .map(|c| find_column(&columns, c))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok((columns, positions))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn exec(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.run(sql).await.map(|_| ())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Column>, ConnectionError> {
        let output = self.run(sql).await?;
        self.pending = output.rows.into();
        Ok(output.columns)
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, ConnectionError> {
        self.step(true).await?;
        Ok(self.pending.pop_front())
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.step(false).await?;
        self.server.count_ping();
        Ok(())
    }

    async fn describe_insert(
        &mut self,
        statement: &InsertStatement,
    ) -> Result<Vec<Column>, ConnectionError> {
        self.step(false).await?;
        let (columns, positions) = self.insert_layout(statement)?;
        Ok(positions.into_iter().map(|i| columns[i].clone()).collect())
    }

    async fn send_batch(
        &mut self,
        statement: &InsertStatement,
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, ConnectionError> {
        self.step(false).await?;
        let (columns, positions) = self.insert_layout(statement)?;

        let mut full_rows = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != positions.len() {
                return Err(ConnectionError::server(
                    codes::TYPE_MISMATCH,
                    format!("expected {} values, got {}", positions.len(), row.len()),
                ));
            }
            let mut full = vec![Value::Null; columns.len()];
            for (&pos, value) in positions.iter().zip(row) {
                if !columns[pos].column_type.accepts(&value) {
                    return Err(ConnectionError::server(
                        codes::TYPE_MISMATCH,
                        format!(
                            "cannot insert {} into column {} of type {}",
                            value.type_name(),
                            columns[pos].name,
                            columns[pos].column_type
                        ),
                    ));
                }
                full[pos] = value;
            }
            full_rows.push(full);
        }

        let count = full_rows.len() as u64;
        let name = table_key(statement.table());
        match self.temp_tables.get_mut(&name) {
            Some(table) => table.rows.extend(full_rows),
            None => self.server.with_tables(|tables| match tables.get_mut(&name) {
                Some(table) => {
                    table.rows.extend(full_rows);
                    Ok(())
                }
                None => Err(unknown_table(&name)),
            })?,
        }
        self.server.count_batch(count);
        Ok(count)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn supports_reset(&self) -> bool {
        true
    }

    async fn reset(&mut self) -> Result<(), ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed);
        }
        self.role = None;
        self.settings = self.server.default_settings();
        self.temp_tables.clear();
        self.pending.clear();
        self.server.count_reset();
        tracing::trace!(connection_id = self.id, "mock connection reset");
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.server.closed();
    }
}

fn create(
    tables: &mut BTreeMap<String, Table>,
    name: String,
    table: Table,
    if_not_exists: bool,
) -> Result<(), ConnectionError> {
    if tables.contains_key(&name) {
        if if_not_exists {
            return Ok(());
        }
        return Err(ConnectionError::server(
            codes::TABLE_ALREADY_EXISTS,
            format!("Table {name} already exists"),
        ));
    }
    tables.insert(name, table);
    Ok(())
}

fn unknown_table(name: &str) -> ConnectionError {
    ConnectionError::server(codes::UNKNOWN_TABLE, format!("Table {name} doesn't exist"))
}

fn unknown_setting(name: &str) -> ConnectionError {
    ConnectionError::server(codes::UNKNOWN_SETTING, format!("Unknown setting {name}"))
}
