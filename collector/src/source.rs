//! SQL connections for source and target databases.
//!
//! Every fetch and every target-database dispatch opens its own connection and
//! closes it when done; there is no pool shared between tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::database::Database as SqlxDatabase;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::types::Oid;
use sqlx::postgres::PgRow;
use sqlx::query::Query;
use sqlx::sqlite::SqliteRow;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::{Decimal, Json, Uuid};
use sqlx::{
    Column, ColumnIndex, Connection, Decode, Encode, Executor, MySql, MySqlConnection,
    PgConnection, Postgres, Row, Sqlite, SqliteConnection, Statement, Type, TypeInfo, ValueRef,
};

use common::errors::{AppError, AppResult};
use common::models::{Database, Driver, FieldValue};
use common::utils::SqlParam;

/// An open connection owned by exactly one task.
#[async_trait]
pub trait SqlConnection: Send {
    /// Column names of the result set produced by `sql`, without reading any row.
    async fn columns(&mut self, sql: &str) -> AppResult<Vec<String>>;

    /// Runs `sql` and returns every row, values in column order.
    async fn fetch_rows(&mut self, sql: &str) -> AppResult<Vec<Vec<FieldValue>>>;

    /// Executes a statement with bound parameters, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> AppResult<u64>;

    /// Closes the connection. Further calls fail.
    async fn close(&mut self) -> AppResult<()>;
}

/// Opens connections to configured databases.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn open(&self, name: &str, database: &Database) -> AppResult<Box<dyn SqlConnection>>;
}

/// Connection wrapper for the supported drivers.
enum DatabaseConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

/// sqlx-backed connector.
pub struct SqlxConnector {
    connect_timeout: Duration,
}

impl SqlxConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect<C: Connection>(&self, name: &str, dsn: &str) -> AppResult<C> {
        tokio::time::timeout(self.connect_timeout, C::connect(dsn))
            .await
            .map_err(|_| {
                AppError::DatabaseConnection(format!(
                    "unable to connect to database {}: timed out after {:?}",
                    name, self.connect_timeout
                ))
            })?
            .map_err(|e| {
                AppError::DatabaseConnection(format!("unable to connect to database {}: {}", name, e))
            })
    }
}

#[async_trait]
impl SqlConnector for SqlxConnector {
    async fn open(&self, name: &str, database: &Database) -> AppResult<Box<dyn SqlConnection>> {
        let driver = Driver::parse(&database.driver).ok_or_else(|| AppError::UnsupportedDriver {
            database: name.to_string(),
            reason: format!("driver {} not supported", database.driver),
        })?;

        let conn = match driver {
            Driver::Postgres => DatabaseConnection::Postgres(self.connect(name, &database.dsn).await?),
            Driver::MySql => DatabaseConnection::MySql(self.connect(name, &database.dsn).await?),
            Driver::Sqlite => DatabaseConnection::Sqlite(self.connect(name, &database.dsn).await?),
        };
        tracing::debug!(database = %name, driver = %driver, "connection opened");

        Ok(Box::new(SqlxConnection {
            name: name.to_string(),
            conn: Some(conn),
        }))
    }
}

struct SqlxConnection {
    name: String,
    conn: Option<DatabaseConnection>,
}

impl SqlxConnection {
    fn conn(&mut self) -> AppResult<&mut DatabaseConnection> {
        let name = &self.name;
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::DatabaseConnection(format!("connection to {} is closed", name)))
    }
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseQuery(e.to_string())
}

#[async_trait]
impl SqlConnection for SqlxConnection {
    async fn columns(&mut self, sql: &str) -> AppResult<Vec<String>> {
        let names = match self.conn()? {
            DatabaseConnection::Postgres(c) => column_names(c.prepare(sql).await.map_err(query_error)?.columns()),
            DatabaseConnection::MySql(c) => column_names(c.prepare(sql).await.map_err(query_error)?.columns()),
            DatabaseConnection::Sqlite(c) => column_names(c.prepare(sql).await.map_err(query_error)?.columns()),
        };
        Ok(names)
    }

    async fn fetch_rows(&mut self, sql: &str) -> AppResult<Vec<Vec<FieldValue>>> {
        match self.conn()? {
            DatabaseConnection::Postgres(c) => {
                let rows = sqlx::query(sql).fetch_all(&mut *c).await.map_err(query_error)?;
                rows.iter().map(decode_row).collect()
            }
            DatabaseConnection::MySql(c) => {
                let rows = sqlx::query(sql).fetch_all(&mut *c).await.map_err(query_error)?;
                rows.iter().map(decode_row).collect()
            }
            DatabaseConnection::Sqlite(c) => {
                let rows = sqlx::query(sql).fetch_all(&mut *c).await.map_err(query_error)?;
                rows.iter().map(decode_row).collect()
            }
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> AppResult<u64> {
        let affected = match self.conn()? {
            DatabaseConnection::Postgres(c) => bind_params(sqlx::query::<Postgres>(sql), params)
                .execute(&mut *c)
                .await
                .map_err(query_error)?
                .rows_affected(),
            DatabaseConnection::MySql(c) => bind_params(sqlx::query::<MySql>(sql), params)
                .execute(&mut *c)
                .await
                .map_err(query_error)?
                .rows_affected(),
            DatabaseConnection::Sqlite(c) => bind_params(sqlx::query::<Sqlite>(sql), params)
                .execute(&mut *c)
                .await
                .map_err(query_error)?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn close(&mut self) -> AppResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let closed = match conn {
            DatabaseConnection::Postgres(c) => c.close().await,
            DatabaseConnection::MySql(c) => c.close().await,
            DatabaseConnection::Sqlite(c) => c.close().await,
        };
        closed.map_err(|e| {
            AppError::DatabaseConnection(format!("could not close connection to {}: {}", self.name, e))
        })
    }
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn decode_row<R>(row: &R) -> AppResult<Vec<FieldValue>>
where
    R: DecodeExtra,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database>,
    for<'r> i32: Decode<'r, R::Database>,
    for<'r> i16: Decode<'r, R::Database>,
    for<'r> f64: Decode<'r, R::Database>,
    for<'r> f32: Decode<'r, R::Database>,
    for<'r> bool: Decode<'r, R::Database>,
    for<'r> String: Decode<'r, R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database>,
    for<'r> DateTime<Utc>: Decode<'r, R::Database>,
    for<'r> NaiveDateTime: Decode<'r, R::Database>,
    for<'r> NaiveDate: Decode<'r, R::Database>,
    for<'r> NaiveTime: Decode<'r, R::Database>,
    i64: Type<R::Database>,
    i32: Type<R::Database>,
    i16: Type<R::Database>,
    f64: Type<R::Database>,
    f32: Type<R::Database>,
    bool: Type<R::Database>,
    String: Type<R::Database>,
    Vec<u8>: Type<R::Database>,
    DateTime<Utc>: Type<R::Database>,
    NaiveDateTime: Type<R::Database>,
    NaiveDate: Type<R::Database>,
    NaiveTime: Type<R::Database>,
{
    (0..row.columns().len())
        .map(|index| decode_value(row, index))
        .collect()
}

/// Decodes one column into the closest scalar.
///
/// Integer types are tried before `bool` so MySQL `TINYINT` stays numeric.
/// Byte strings are decoded to text. Types only one driver knows about are
/// left to [`DecodeExtra`].
fn decode_value<R>(row: &R, index: usize) -> AppResult<FieldValue>
where
    R: DecodeExtra,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database>,
    for<'r> i32: Decode<'r, R::Database>,
    for<'r> i16: Decode<'r, R::Database>,
    for<'r> f64: Decode<'r, R::Database>,
    for<'r> f32: Decode<'r, R::Database>,
    for<'r> bool: Decode<'r, R::Database>,
    for<'r> String: Decode<'r, R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database>,
    for<'r> DateTime<Utc>: Decode<'r, R::Database>,
    for<'r> NaiveDateTime: Decode<'r, R::Database>,
    for<'r> NaiveDate: Decode<'r, R::Database>,
    for<'r> NaiveTime: Decode<'r, R::Database>,
    i64: Type<R::Database>,
    i32: Type<R::Database>,
    i16: Type<R::Database>,
    f64: Type<R::Database>,
    f32: Type<R::Database>,
    bool: Type<R::Database>,
    String: Type<R::Database>,
    Vec<u8>: Type<R::Database>,
    DateTime<Utc>: Type<R::Database>,
    NaiveDateTime: Type<R::Database>,
    NaiveDate: Type<R::Database>,
    NaiveTime: Type<R::Database>,
{
    if row.try_get_raw(index).map_err(query_error)?.is_null() {
        return Ok(FieldValue::Null);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(FieldValue::Int(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Ok(FieldValue::Int(v.into()));
    }
    if let Ok(v) = row.try_get::<i16, _>(index) {
        return Ok(FieldValue::Int(v.into()));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(FieldValue::Float(v));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Ok(FieldValue::Float(v.into()));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(FieldValue::Bool(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(FieldValue::Text(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(FieldValue::Text(String::from_utf8_lossy(&v).into_owned()));
    }
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(index) {
        return Ok(FieldValue::Text(v.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(index) {
        return Ok(FieldValue::Text(v.to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(index) {
        return Ok(FieldValue::Text(v.to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(index) {
        return Ok(FieldValue::Text(v.to_string()));
    }
    if let Some(v) = row.decode_extra(index) {
        return Ok(v);
    }

    let column = row.column(index);
    Err(AppError::UnsupportedColumnType {
        column: column.name().to_string(),
        type_name: column.type_info().name().to_string(),
    })
}

/// Driver-specific column types outside the shared decode chain.
trait DecodeExtra: Row {
    fn decode_extra(&self, index: usize) -> Option<FieldValue>;
}

impl DecodeExtra for PgRow {
    fn decode_extra(&self, index: usize) -> Option<FieldValue> {
        if let Ok(v) = self.try_get::<Decimal, _>(index) {
            return Some(decimal_value(v));
        }
        if let Ok(v) = self.try_get::<Uuid, _>(index) {
            return Some(FieldValue::Text(v.to_string()));
        }
        if let Ok(v) = self.try_get::<serde_json::Value, _>(index) {
            return Some(FieldValue::Text(v.to_string()));
        }
        if let Ok(v) = self.try_get::<IpNetwork, _>(index) {
            return Some(FieldValue::Text(v.to_string()));
        }
        if let Ok(v) = self.try_get::<Oid, _>(index) {
            return Some(FieldValue::Int(v.0.into()));
        }
        None
    }
}

impl DecodeExtra for MySqlRow {
    fn decode_extra(&self, index: usize) -> Option<FieldValue> {
        if let Ok(v) = self.try_get::<u64, _>(index) {
            return Some(unsigned_value(v));
        }
        if let Ok(v) = self.try_get::<u32, _>(index) {
            return Some(FieldValue::Int(v.into()));
        }
        if let Ok(v) = self.try_get::<u16, _>(index) {
            return Some(FieldValue::Int(v.into()));
        }
        if let Ok(v) = self.try_get::<u8, _>(index) {
            return Some(FieldValue::Int(v.into()));
        }
        if let Ok(v) = self.try_get::<i8, _>(index) {
            return Some(FieldValue::Int(v.into()));
        }
        if let Ok(v) = self.try_get::<Decimal, _>(index) {
            return Some(decimal_value(v));
        }
        if let Ok(v) = self.try_get::<serde_json::Value, _>(index) {
            return Some(FieldValue::Text(v.to_string()));
        }
        None
    }
}

impl DecodeExtra for SqliteRow {
    // Storage classes are all covered by the shared chain.
    fn decode_extra(&self, _index: usize) -> Option<FieldValue> {
        None
    }
}

/// Exact decimals become floats; values `f64` cannot parse stay textual.
fn decimal_value(v: Decimal) -> FieldValue {
    let text = v.to_string();
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => FieldValue::Float(f),
        _ => FieldValue::Text(text),
    }
}

fn unsigned_value(v: u64) -> FieldValue {
    match i64::try_from(v) {
        Ok(i) => FieldValue::Int(i),
        Err(_) => FieldValue::Float(v as f64),
    }
}

fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as SqlxDatabase>::Arguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, DB, <DB as SqlxDatabase>::Arguments<'q>>
where
    DB: SqlxDatabase,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
    Json<serde_json::Value>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Json(v) => query.bind(Json(v.clone())),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite() -> Database {
        Database {
            driver: "sqlite".to_string(),
            dsn: "sqlite::memory:".to_string(),
            insert_sql: String::new(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_columns_and_rows() {
        let connector = SqlxConnector::new(Duration::from_secs(5));
        let mut conn = connector.open("mem", &sqlite()).await.unwrap();
        let sql = "SELECT 42 AS value, 'a' AS host, 1.5 AS ratio, NULL AS empty, X'6869' AS raw";

        let columns = conn.columns(sql).await.unwrap();
        assert_eq!(columns, vec!["value", "host", "ratio", "empty", "raw"]);

        let rows = conn.fetch_rows(sql).await.unwrap();
        assert_eq!(
            rows,
            vec![vec![
                FieldValue::Int(42),
                FieldValue::Text("a".into()),
                FieldValue::Float(1.5),
                FieldValue::Null,
                FieldValue::Text("hi".into()),
            ]]
        );
        conn.close().await.unwrap();
        assert!(conn.fetch_rows(sql).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_execute_binds_params() {
        let connector = SqlxConnector::new(Duration::from_secs(5));
        let mut conn = connector.open("mem", &sqlite()).await.unwrap();
        conn.execute("CREATE TABLE m (name TEXT, a INTEGER, b REAL, note TEXT)", &[])
            .await
            .unwrap();

        let affected = conn
            .execute(
                "INSERT INTO m VALUES ($1,$2,$3,$4)",
                &[
                    SqlParam::Text("cpu".into()),
                    SqlParam::Int(7),
                    SqlParam::Float(0.5),
                    SqlParam::Null,
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn.fetch_rows("SELECT name, a, b, note FROM m").await.unwrap();
        assert_eq!(rows[0][0], FieldValue::Text("cpu".into()));
        assert_eq!(rows[0][1], FieldValue::Int(7));
        assert_eq!(rows[0][3], FieldValue::Null);
        conn.close().await.unwrap();
    }

    #[test]
    fn test_decimal_value() {
        let d: Decimal = "12.50".parse().unwrap();
        assert_eq!(decimal_value(d), FieldValue::Float(12.5));
        assert_eq!(decimal_value(Decimal::ZERO), FieldValue::Float(0.0));
    }

    #[test]
    fn test_unsigned_value() {
        assert_eq!(unsigned_value(7), FieldValue::Int(7));
        assert_eq!(unsigned_value(i64::MAX as u64), FieldValue::Int(i64::MAX));
        assert_eq!(unsigned_value(u64::MAX), FieldValue::Float(u64::MAX as f64));
    }

    #[tokio::test]
    async fn test_sqlite_time_column() {
        let connector = SqlxConnector::new(Duration::from_secs(5));
        let mut conn = connector.open("mem", &sqlite()).await.unwrap();
        conn.execute("CREATE TABLE t (at TIME, missing TEXT)", &[]).await.unwrap();
        conn.execute("INSERT INTO t VALUES ('12:30:00', NULL)", &[]).await.unwrap();

        let rows = conn.fetch_rows("SELECT at, missing FROM t").await.unwrap();
        assert_eq!(rows, vec![vec![FieldValue::Text("12:30:00".into()), FieldValue::Null]]);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_driver() {
        let connector = SqlxConnector::new(Duration::from_secs(5));
        let db = Database {
            driver: "sqlserver".to_string(),
            ..sqlite()
        };
        let err = connector.open("mssql", &db).await.err().unwrap();
        assert!(matches!(err, AppError::UnsupportedDriver { .. }));
    }

    #[tokio::test]
    async fn test_bad_query_is_query_error() {
        let connector = SqlxConnector::new(Duration::from_secs(5));
        let mut conn = connector.open("mem", &sqlite()).await.unwrap();
        let err = conn.columns("SELECT * FROM missing_table").await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseQuery(_)));
        conn.close().await.unwrap();
    }
}
