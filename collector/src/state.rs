//! Application state for the collector.

use std::sync::Arc;

use common::config::AppConfig;

use crate::dispatcher::Dispatcher;
use crate::fetcher::Fetcher;
use crate::runner::TestRunner;
use crate::sinks::{HttpSinkConnector, SinkConnector};
use crate::source::{SqlConnector, SqlxConnector};

/// Connectors shared by every pass.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sql: Arc<dyn SqlConnector>,
    pub sinks: Arc<dyn SinkConnector>,
}

impl AppState {
    /// Creates the production state: sqlx for SQL, reqwest for InfluxDB.
    pub fn new(config: AppConfig) -> Self {
        Self {
            sql: Arc::new(SqlxConnector::new(config.connect_timeout())),
            sinks: Arc::new(HttpSinkConnector::new(config.http_timeout())),
            config,
        }
    }

    pub fn runner(&self) -> TestRunner {
        TestRunner::new(
            Fetcher::new(self.sql.clone()),
            Dispatcher::new(self.sql.clone(), self.sinks.clone(), self.config.dispatch_timeout()),
        )
    }
}
