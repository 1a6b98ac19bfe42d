//! Execution of a single test: fetch from every source, then dispatch.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use common::errors::{AppError, AppResult};
use common::models::{Config, FieldValue, TestResult};

use crate::dispatcher::Dispatcher;
use crate::fetcher::Fetcher;

/// Field holding the query duration in seconds.
pub const ELAPSED_FIELD: &str = "q_elapsed";
/// Tag naming the source database of a result.
pub const DATABASE_TAG: &str = "database_name";

pub struct TestRunner {
    fetcher: Fetcher,
    dispatcher: Dispatcher,
}

impl TestRunner {
    pub fn new(fetcher: Fetcher, dispatcher: Dispatcher) -> Self {
        Self { fetcher, dispatcher }
    }

    /// Runs test `name` against its source databases in list order and
    /// dispatches the concatenated results.
    ///
    /// A fetch error aborts the test before anything is dispatched. Static tags
    /// override row tags of the same name.
    pub async fn run_test(&self, config: Arc<Config>, name: &str) -> AppResult<()> {
        let test = config
            .tests
            .get(name)
            .ok_or_else(|| AppError::Config(format!("test '{}' does not exist", name)))?;

        let mut results = Vec::new();
        for database in &test.databases {
            info!(test = %name, database = %database, "running test");
            let started = Instant::now();
            let fetched = self.fetcher.fetch(&config, database, test).await?;
            let elapsed = started.elapsed().as_secs_f64();
            debug!(test = %name, database = %database, rows = fetched.len(), elapsed, "fetched");

            for mut row in fetched {
                row.fields.insert(ELAPSED_FIELD.to_string(), FieldValue::Float(elapsed));
                row.tags.insert(DATABASE_TAG.to_string(), database.clone());
                row.tags.extend(test.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                results.push(TestResult::from_fetch(&test.measurement, row));
            }
        }

        if results.is_empty() {
            debug!(test = %name, "no results, nothing to dispatch");
            return Ok(());
        }
        self.dispatcher.dispatch(&config, name, results).await;
        Ok(())
    }
}
