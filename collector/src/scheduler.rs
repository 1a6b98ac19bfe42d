//! Pass loop.
//!
//! A pass runs every executable test of every configuration file once, in
//! ascending `order`. Between passes the scheduler sleeps for whatever is
//! left of the wait interval. The stop token is honoured between passes and
//! during the wait, never in the middle of a pass.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use common::models::Config;
use common::utils::IdGenerator;

use crate::loader::ProbeFile;
use crate::runner::TestRunner;

/// How many passes to run. Negative counts run until stopped.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub count: i64,
    pub wait: Duration,
}

impl Schedule {
    fn is_last(&self, completed: u64) -> bool {
        self.count >= 0 && completed >= self.count.unsigned_abs()
    }
}

pub struct Scheduler {
    runner: TestRunner,
    files: Vec<ProbeFile>,
    schedule: Schedule,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: TestRunner, files: Vec<ProbeFile>, schedule: Schedule, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            files,
            schedule,
            shutdown,
        }
    }

    /// Runs passes until the count is reached or the token is cancelled.
    /// Returns the number of completed passes.
    pub async fn run(mut self) -> u64 {
        let mut completed = 0u64;
        while !self.schedule.is_last(completed) && !self.shutdown.is_cancelled() {
            let started = Instant::now();
            let pass = completed + 1;
            let span = info_span!("pass", pass, pass_id = %IdGenerator::pass_id());

            if completed > 0 {
                self.reload();
            }
            self.run_pass().instrument(span).await;
            completed = pass;

            let elapsed = started.elapsed();
            if self.schedule.is_last(completed) {
                info!(pass, elapsed = ?elapsed, "pass finished");
                break;
            }
            let remaining = self.schedule.wait.saturating_sub(elapsed);
            info!(pass, elapsed = ?elapsed, wait = ?remaining, "pass finished, waiting for the next one");
            if remaining.is_zero() {
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
        if self.shutdown.is_cancelled() {
            info!(completed, "stop requested, scheduler exiting");
        }
        completed
    }

    fn reload(&mut self) {
        for file in &mut self.files {
            if let Err(e) = file.reload() {
                warn!(
                    path = %file.path.display(),
                    error = %e,
                    "could not reload configuration, keeping the previous one"
                );
            }
        }
    }

    async fn run_pass(&self) {
        for file in &self.files {
            for name in execution_order(&file.config) {
                if let Err(e) = self.runner.run_test(file.config.clone(), &name).await {
                    error!(test = %name, path = %file.path.display(), code = e.code(), error = %e, "error running test");
                }
            }
        }
    }
}

/// Names of executable tests, ascending by `order`, ties by name.
pub fn execution_order(config: &Config) -> Vec<String> {
    let mut tests: Vec<(i64, &String)> = config
        .tests
        .iter()
        .filter(|(_, test)| !test.is_template)
        .map(|(name, test)| (test.order, name))
        .collect();
    tests.sort();
    tests.into_iter().map(|(_, name)| name.clone()).collect()
}
