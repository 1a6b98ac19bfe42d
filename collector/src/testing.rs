//! In-memory doubles for the SQL and sink seams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use common::errors::{AppError, AppResult};
use common::models::{Database, FieldValue};
use common::utils::SqlParam;

use crate::sinks::{Point, SinkConnector, SinkTarget, TimeSeriesClient};
use crate::source::{SqlConnection, SqlConnector};

#[derive(Debug, Default)]
pub struct SqlLog {
    pub opened: Vec<String>,
    pub fetches: usize,
    /// (database, statement, params)
    pub executed: Vec<(String, String, Vec<SqlParam>)>,
    pub closed: usize,
}

/// Serves a fixed result set to every query and records all calls.
#[derive(Clone, Default)]
pub struct MockSql {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
    pub fail_open: Vec<String>,
    /// `execute` fails when the statement contains one of these.
    pub fail_statements: Vec<String>,
    pub query_delay: Option<Duration>,
    pub log: Arc<Mutex<SqlLog>>,
}

impl MockSql {
    pub fn with_rows(columns: &[&str], rows: Vec<Vec<FieldValue>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            ..Default::default()
        }
    }

    pub fn log(&self) -> MutexGuard<'_, SqlLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl SqlConnector for MockSql {
    async fn open(&self, name: &str, _database: &Database) -> AppResult<Box<dyn SqlConnection>> {
        if self.fail_open.iter().any(|n| n == name) {
            return Err(AppError::DatabaseConnection(format!("unable to connect to database {}", name)));
        }
        self.log().opened.push(name.to_string());
        Ok(Box::new(MockConnection {
            name: name.to_string(),
            mock: self.clone(),
        }))
    }
}

struct MockConnection {
    name: String,
    mock: MockSql,
}

#[async_trait]
impl SqlConnection for MockConnection {
    async fn columns(&mut self, _sql: &str) -> AppResult<Vec<String>> {
        Ok(self.mock.columns.clone())
    }

    async fn fetch_rows(&mut self, _sql: &str) -> AppResult<Vec<Vec<FieldValue>>> {
        if let Some(delay) = self.mock.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.mock.log().fetches += 1;
        Ok(self.mock.rows.clone())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> AppResult<u64> {
        if self.mock.fail_statements.iter().any(|s| sql.contains(s.as_str())) {
            return Err(AppError::DatabaseQuery(format!("rejected: {}", sql)));
        }
        self.mock
            .log()
            .executed
            .push((self.name.clone(), sql.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.mock.log().closed += 1;
        Ok(())
    }
}

/// Records written batches per sink instance.
#[derive(Clone, Default)]
pub struct MockSinks {
    pub fail_connect: HashSet<String>,
    /// Instances whose writes never complete.
    pub hang: HashSet<String>,
    pub writes: Arc<Mutex<Vec<(String, Vec<Point>)>>>,
    pub closed: Arc<Mutex<Vec<String>>>,
}

impl MockSinks {
    pub fn writes(&self) -> Vec<(String, Vec<Point>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SinkConnector for MockSinks {
    async fn connect(&self, name: &str, _target: &SinkTarget) -> AppResult<Box<dyn TimeSeriesClient>> {
        if self.fail_connect.contains(name) {
            return Err(AppError::SinkConnection(format!("{} unreachable", name)));
        }
        Ok(Box::new(MockClient {
            name: name.to_string(),
            sinks: self.clone(),
        }))
    }
}

struct MockClient {
    name: String,
    sinks: MockSinks,
}

#[async_trait]
impl TimeSeriesClient for MockClient {
    async fn write_batch(&mut self, points: &[Point]) -> AppResult<()> {
        if self.sinks.hang.contains(&self.name) {
            std::future::pending::<()>().await;
        }
        self.sinks
            .writes
            .lock()
            .unwrap()
            .push((self.name.clone(), points.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.sinks.closed.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}
