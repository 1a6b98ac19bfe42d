//! Runs a test's query against one source database and classifies the rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use common::errors::{AppError, AppResult};
use common::models::{Config, FetchResult, FieldValue, Test};
use common::utils::IdentifierValidator;

use crate::source::{SqlConnection, SqlConnector};

pub struct Fetcher {
    connector: Arc<dyn SqlConnector>,
}

impl Fetcher {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        Self { connector }
    }

    /// Queries `database_name` with `test.sql`.
    ///
    /// Zero rows is an empty result. The connection is closed on every path;
    /// a failed close is only logged.
    pub async fn fetch(&self, config: &Config, database_name: &str, test: &Test) -> AppResult<Vec<FetchResult>> {
        let database = config
            .databases
            .get(database_name)
            .ok_or_else(|| AppError::Config(format!("database '{}' does not exist", database_name)))?;

        let mut conn = self.connector.open(database_name, database).await?;
        let outcome = match test.timeout {
            Some(limit) => tokio::time::timeout(limit, query(conn.as_mut(), test))
                .await
                .unwrap_or(Err(AppError::QueryTimeout(limit))),
            None => query(conn.as_mut(), test).await,
        };

        if let Err(e) = conn.close().await {
            warn!(database = %database_name, error = %e, "could not close source connection");
        }
        outcome
    }
}

async fn query(conn: &mut dyn SqlConnection, test: &Test) -> AppResult<Vec<FetchResult>> {
    let columns = conn.columns(&test.sql).await?;
    for column in &columns {
        IdentifierValidator::validate_column(column)?;
    }

    let rows = conn.fetch_rows(&test.sql).await?;
    debug!(rows = rows.len(), columns = columns.len(), "query returned");
    rows.into_iter()
        .map(|row| classify_row(&columns, row, &test.fields))
        .collect()
}

/// Splits one row into fields and tags.
///
/// Fails with the sorted list of declared fields the row does not carry.
pub fn classify_row(columns: &[String], row: Vec<FieldValue>, fields: &BTreeSet<String>) -> AppResult<FetchResult> {
    let mut result = FetchResult::default();
    for (column, value) in columns.iter().zip(row) {
        if fields.contains(column) {
            result.fields.insert(column.clone(), value);
        } else {
            result.tags.insert(column.clone(), value.to_tag());
        }
    }

    let missing: Vec<String> = fields
        .iter()
        .filter(|name| !result.fields.contains_key(*name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingFields(missing));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::MockSql;

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn setup(mock: &MockSql) -> (Fetcher, Config, Test) {
        let config: Config = serde_yaml::from_str(
            "databases:\n  src:\n    driver: sqlite\n    dsn: 'sqlite::memory:'\n",
        )
        .unwrap();
        let test = Test {
            databases: vec!["src".into()],
            fields: fields(&["value"]),
            measurement: "m".into(),
            sql: "SELECT value, host FROM t".into(),
            ..Default::default()
        };
        (Fetcher::new(Arc::new(mock.clone())), config, test)
    }

    #[test]
    fn test_classify_fields_and_tags() {
        let columns = vec!["value".to_string(), "host".to_string()];
        let row = vec![FieldValue::Int(42), FieldValue::Text("a".into())];
        let result = classify_row(&columns, row, &fields(&["value"])).unwrap();
        assert_eq!(result.fields["value"], FieldValue::Int(42));
        assert_eq!(result.tags["host"], "a");
        assert_eq!(result.fields.len(), 1);
        assert_eq!(result.tags.len(), 1);
    }

    #[test]
    fn test_classify_renders_tags_as_text() {
        let columns = vec!["shard".to_string(), "region".to_string(), "n".to_string()];
        let row = vec![FieldValue::Int(3), FieldValue::Null, FieldValue::Float(1.0)];
        let result = classify_row(&columns, row, &fields(&["n"])).unwrap();
        assert_eq!(result.tags["shard"], "3");
        assert_eq!(result.tags["region"], "");
    }

    #[test]
    fn test_classify_missing_fields_sorted() {
        let columns = vec!["host".to_string()];
        let row = vec![FieldValue::Text("a".into())];
        let err = classify_row(&columns, row, &fields(&["zeta", "alpha"])).unwrap_err();
        match err {
            AppError::MissingFields(names) => assert_eq!(names, vec!["alpha", "zeta"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_rows() {
        let mock = MockSql::with_rows(
            &["value", "host"],
            vec![
                vec![FieldValue::Int(42), FieldValue::Text("a".into())],
                vec![FieldValue::Int(7), FieldValue::Text("b".into())],
            ],
        );
        let (fetcher, config, test) = setup(&mock);
        let results = fetcher.fetch(&config, "src", &test).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].tags["host"], "b");
        assert_eq!(mock.log().closed, 1);
    }

    #[tokio::test]
    async fn test_zero_rows_is_empty() {
        let mock = MockSql::with_rows(&["value"], vec![]);
        let (fetcher, config, test) = setup(&mock);
        assert!(fetcher.fetch(&config, "src", &test).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_column_fails_before_reading_rows() {
        let mock = MockSql::with_rows(&["value", "bad name"], vec![vec![FieldValue::Int(1), FieldValue::Null]]);
        let (fetcher, config, test) = setup(&mock);
        let err = fetcher.fetch(&config, "src", &test).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidColumn(ref c) if c == "bad name"));
        let log = mock.log();
        assert_eq!(log.fetches, 0);
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_missing_field_in_any_row_fails() {
        let mock = MockSql::with_rows(&["host"], vec![vec![FieldValue::Text("a".into())]]);
        let (fetcher, config, test) = setup(&mock);
        let err = fetcher.fetch(&config, "src", &test).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing fields: value (specified in 'fields' but missing from result)"
        );
    }

    #[tokio::test]
    async fn test_open_failure() {
        let mut mock = MockSql::with_rows(&["value"], vec![]);
        mock.fail_open = vec!["src".to_string()];
        let (fetcher, config, test) = setup(&mock);
        let err = fetcher.fetch(&config, "src", &test).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseConnection(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut mock = MockSql::with_rows(&["value"], vec![vec![FieldValue::Int(1)]]);
        mock.query_delay = Some(Duration::from_secs(5));
        let (fetcher, config, mut test) = setup(&mock);
        test.timeout = Some(Duration::from_millis(20));
        let err = fetcher.fetch(&config, "src", &test).await.unwrap_err();
        assert!(matches!(err, AppError::QueryTimeout(_)));
        assert_eq!(mock.log().closed, 1);
    }
}
