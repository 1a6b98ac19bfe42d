//! Fan-out of a test's results to every declared sink.
//!
//! Families run concurrently, and inside a family every instance is its own
//! task. One deadline covers the whole dispatch; when it expires the token is
//! cancelled and every unfinished connect, write or insert is dropped.
//! Failures are logged per instance and never returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::models::{Config, Database, Driver, TestResult};
use common::utils::{template, IdGenerator, MarkerStyle};

use crate::sinks::{Point, SinkConnector, SinkFamily, SinkTarget};
use crate::source::SqlConnector;

pub struct Dispatcher {
    sql: Arc<dyn SqlConnector>,
    sinks: Arc<dyn SinkConnector>,
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(sql: Arc<dyn SqlConnector>, sinks: Arc<dyn SinkConnector>, deadline: Duration) -> Self {
        Self { sql, sinks, deadline }
    }

    /// Delivers `results` to every sink named by test `test_name`.
    ///
    /// Returns once all instances finished or the deadline expired.
    pub async fn dispatch(&self, config: &Config, test_name: &str, results: Vec<TestResult>) {
        let Some(test) = config.tests.get(test_name) else {
            warn!(test = %test_name, "dispatch for unknown test skipped");
            return;
        };
        let dispatch_id = IdGenerator::dispatch_id();
        let results: Arc<[TestResult]> = results.into();
        let cancel = CancellationToken::new();
        let mut families = JoinSet::new();

        let v1 = instances(&test.influxes, &config.influxes, |d| SinkTarget::V1(d.clone()));
        let v2 = instances(&test.influxes2, &config.influxes2, |d| SinkTarget::V2(d.clone()));
        let v3 = instances(&test.influxes3, &config.influxes3, |d| SinkTarget::V3(d.clone()));
        for (family, targets) in [
            (SinkFamily::InfluxV1, v1),
            (SinkFamily::InfluxV2, v2),
            (SinkFamily::InfluxV3, v3),
        ] {
            if targets.is_empty() {
                continue;
            }
            families.spawn(time_series_family(
                family,
                targets,
                self.sinks.clone(),
                results.clone(),
                cancel.clone(),
            ));
        }

        let databases = instances(&test.target_databases, &config.databases, Database::clone);
        if !databases.is_empty() {
            families.spawn(database_family(databases, self.sql.clone(), results.clone(), cancel.clone()));
        }

        debug!(test = %test_name, dispatch = %dispatch_id, results = results.len(), "dispatching");
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = families.join_next() => match joined {
                    None => break,
                    Some(Err(e)) => error!(test = %test_name, error = %e, "sink family task failed"),
                    Some(Ok(())) => {}
                },
                _ = &mut deadline, if !cancel.is_cancelled() => {
                    warn!(test = %test_name, dispatch = %dispatch_id, deadline = ?self.deadline, "dispatch deadline expired");
                    cancel.cancel();
                }
            }
        }
        debug!(test = %test_name, dispatch = %dispatch_id, "dispatch finished");
    }
}

/// Looks up the definitions a test refers to. Unknown names are logged and skipped.
fn instances<D, T>(names: &[String], defined: &BTreeMap<String, D>, build: impl Fn(&D) -> T) -> Vec<(String, T)> {
    names
        .iter()
        .filter_map(|name| match defined.get(name) {
            Some(def) => Some((name.clone(), build(def))),
            None => {
                warn!(instance = %name, "sink is not defined, skipped");
                None
            }
        })
        .collect()
}

async fn time_series_family(
    family: SinkFamily,
    targets: Vec<(String, SinkTarget)>,
    sinks: Arc<dyn SinkConnector>,
    results: Arc<[TestResult]>,
    cancel: CancellationToken,
) {
    let mut tasks = JoinSet::new();
    for (name, target) in targets {
        tasks.spawn(write_time_series(name, target, sinks.clone(), results.clone(), cancel.clone()));
    }
    join_all(family, tasks).await;
}

async fn write_time_series(
    name: String,
    target: SinkTarget,
    sinks: Arc<dyn SinkConnector>,
    results: Arc<[TestResult]>,
    cancel: CancellationToken,
) {
    let family = target.family();
    let work = async {
        let mut client = sinks.connect(&name, &target).await?;
        let timestamp = Utc::now();
        let points: Vec<Point> = results.iter().map(|r| Point::from_result(r, timestamp)).collect();
        let written = client.write_batch(&points).await;
        if let Err(e) = client.close().await {
            warn!(sink = %family, instance = %name, error = %e, "could not close sink client");
        }
        written.map(|()| points.len())
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!(sink = %family, instance = %name, "write abandoned at dispatch deadline");
        }
        outcome = work => match outcome {
            Ok(points) => info!(sink = %family, instance = %name, points, "batch written"),
            Err(e) => error!(sink = %family, instance = %name, error = %e, "could not write batch"),
        }
    }
}

async fn database_family(
    targets: Vec<(String, Database)>,
    sql: Arc<dyn SqlConnector>,
    results: Arc<[TestResult]>,
    cancel: CancellationToken,
) {
    let mut tasks = JoinSet::new();
    for (name, database) in targets {
        tasks.spawn(insert_results(name, database, sql.clone(), results.clone(), cancel.clone()));
    }
    join_all(SinkFamily::Database, tasks).await;
}

/// Expands and executes `insert_sql` once per result on one connection.
async fn insert_results(
    name: String,
    database: Database,
    sql: Arc<dyn SqlConnector>,
    results: Arc<[TestResult]>,
    cancel: CancellationToken,
) {
    let family = SinkFamily::Database;
    let Some(driver) = Driver::parse(&database.driver) else {
        error!(sink = %family, instance = %name, driver = %database.driver, "unsupported driver");
        return;
    };
    let style = MarkerStyle::from(driver);

    let work = async {
        let mut conn = match sql.open(&name, &database).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(sink = %family, instance = %name, error = %e, "could not connect to target database");
                return;
            }
        };

        let mut inserted = 0usize;
        for result in results.iter() {
            let expansion = match template::expand(&database.insert_sql, result, style) {
                Ok(expansion) => expansion,
                Err(e) => {
                    error!(sink = %family, instance = %name, error = %e, "could not expand insert_sql");
                    continue;
                }
            };
            match conn.execute(&expansion.sql, &expansion.params).await {
                Ok(_) => inserted += 1,
                Err(e) => error!(
                    sink = %family,
                    instance = %name,
                    statement = %expansion.sql,
                    error = %e,
                    "could not execute insert statement"
                ),
            }
        }

        if let Err(e) = conn.close().await {
            warn!(sink = %family, instance = %name, error = %e, "could not close target connection");
        }
        info!(sink = %family, instance = %name, inserted, total = results.len(), "results inserted");
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!(sink = %family, instance = %name, "insert abandoned at dispatch deadline");
        }
        _ = work => {}
    }
}

async fn join_all(family: SinkFamily, mut tasks: JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(sink = %family, error = %e, "sink task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use common::models::FieldValue;
    use common::utils::SqlParam;

    use super::*;
    use crate::testing::{MockSinks, MockSql};

    const CONFIG: &str = r#"
databases:
  src:
    driver: sqlite
    dsn: 'sqlite::memory:'
  warehouse:
    driver: pgx
    dsn: postgres://localhost/w
    insert_sql: INSERT INTO t VALUES ({MEASUREMENT},{FIELDVALUES})
  audit:
    driver: mysql
    dsn: mysql://localhost/a
    insert_sql: INSERT INTO log (payload) VALUES ({FIELDS_JSON})
influxes:
  down:
    host: http://down:8086
    database: metrics
  up:
    host: http://up:8086
    database: metrics
influxes2:
  slow:
    url: http://slow:8086
    org: acme
    bucket: probes
tests:
  probe:
    databases: [src]
    influxes: [down, up]
    target_databases: [warehouse]
    measurement: m
    fields: [a, b]
    sql: SELECT 1 AS a, 2 AS b
"#;

    fn config() -> Config {
        serde_yaml::from_str(CONFIG).unwrap()
    }

    fn result(a: i64, b: i64) -> TestResult {
        TestResult {
            measurement: "m".into(),
            fields: BTreeMap::from([("a".to_string(), FieldValue::Int(a)), ("b".to_string(), FieldValue::Int(b))]),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let sql = MockSql::default();
        let sinks = MockSinks {
            fail_connect: ["down".to_string()].into(),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(sql.clone()), Arc::new(sinks.clone()), Duration::from_secs(5));

        dispatcher.dispatch(&config(), "probe", vec![result(1, 2), result(3, 4)]).await;

        let writes = sinks.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "up");
        assert_eq!(writes[0].1.len(), 2);
        assert_eq!(writes[0].1[0].timestamp, writes[0].1[1].timestamp);
        assert_eq!(sinks.closed(), vec!["up".to_string()]);

        let log = sql.log();
        assert_eq!(log.executed.len(), 2);
        assert_eq!(log.executed[0].1, "INSERT INTO t VALUES ($1,$2,$3)");
        assert_eq!(
            log.executed[0].2,
            vec![SqlParam::Text("m".into()), SqlParam::Int(1), SqlParam::Int(2)]
        );
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_failing_insert_continues_with_next_result() {
        let mut cfg = config();
        cfg.databases.get_mut("warehouse").unwrap().insert_sql =
            "INSERT INTO {MEASUREMENT_NAME} VALUES ({FIELDS[a]})".into();
        let sql = MockSql {
            fail_statements: vec!["INSERT INTO broken".to_string()],
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(sql.clone()), Arc::new(MockSinks::default()), Duration::from_secs(5));

        let mut bad = result(0, 0);
        bad.measurement = "broken".into();
        dispatcher.dispatch(&cfg, "probe", vec![bad, result(5, 6)]).await;

        let log = sql.log();
        assert_eq!(log.executed.len(), 1);
        assert_eq!(log.executed[0].1, "INSERT INTO m VALUES ($1)");
        assert_eq!(log.executed[0].2, vec![SqlParam::Int(5)]);
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_does_not_stop_other_target() {
        let mut cfg = config();
        cfg.tests.get_mut("probe").unwrap().target_databases = vec!["warehouse".into(), "audit".into()];
        let sql = MockSql {
            fail_open: vec!["warehouse".to_string()],
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(sql.clone()), Arc::new(MockSinks::default()), Duration::from_secs(5));

        dispatcher.dispatch(&cfg, "probe", vec![result(1, 2)]).await;

        let log = sql.log();
        assert_eq!(log.executed.len(), 1);
        assert_eq!(log.executed[0].0, "audit");
        assert_eq!(log.executed[0].1, "INSERT INTO log (payload) VALUES (?)");
    }

    #[tokio::test]
    async fn test_rejected_statement_is_isolated() {
        let sql = MockSql {
            fail_statements: vec!["INSERT INTO t".to_string()],
            ..Default::default()
        };
        let mut cfg = config();
        cfg.tests.get_mut("probe").unwrap().target_databases = vec!["warehouse".into(), "audit".into()];
        let sinks = MockSinks::default();
        let dispatcher = Dispatcher::new(Arc::new(sql.clone()), Arc::new(sinks.clone()), Duration::from_secs(5));

        dispatcher.dispatch(&cfg, "probe", vec![result(1, 2), result(3, 4)]).await;

        let log = sql.log();
        assert_eq!(log.executed.len(), 2);
        assert!(log.executed.iter().all(|(db, _, _)| db == "audit"));
        assert_eq!(log.closed, 2);
        assert_eq!(sinks.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_deadline_abandons_hung_sink() {
        let mut cfg = config();
        cfg.tests.get_mut("probe").unwrap().influxes2 = vec!["slow".into()];
        let sinks = MockSinks {
            hang: ["slow".to_string()].into(),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(MockSql::default()),
            Arc::new(sinks.clone()),
            Duration::from_millis(50),
        );

        tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(&cfg, "probe", vec![result(1, 2)]))
            .await
            .unwrap();

        let written: Vec<String> = sinks.writes().into_iter().map(|(name, _)| name).collect();
        assert!(written.contains(&"up".to_string()));
        assert!(!written.contains(&"slow".to_string()));
    }
}
