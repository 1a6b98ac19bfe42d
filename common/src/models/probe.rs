//! Probe configuration models.
//!
//! One YAML file decodes into one [`Config`]. Decoding is passive: names,
//! drivers and references are checked afterwards by the collector's resolver
//! and validator.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Root aggregate of one probe configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source and target SQL databases.
    pub databases: BTreeMap<String, Database>,
    /// InfluxDB 1.x sinks.
    pub influxes: BTreeMap<String, InfluxV1>,
    /// InfluxDB 2.x sinks.
    pub influxes2: BTreeMap<String, InfluxV2>,
    /// InfluxDB 3.x sinks.
    pub influxes3: BTreeMap<String, InfluxV3>,
    /// Probe definitions.
    pub tests: BTreeMap<String, Test>,
}

/// SQL database connection descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// Driver name, see [`Driver::parse`].
    pub driver: String,
    /// Connection URL.
    pub dsn: String,
    /// INSERT template, required when the database is used as a target.
    pub insert_sql: String,
}

/// Supported SQL drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// PostgreSQL (`pgx` or `postgres`).
    Postgres,
    /// MySQL / MariaDB.
    MySql,
    /// SQLite.
    Sqlite,
}

impl Driver {
    /// Names accepted in the `driver` key.
    pub const SUPPORTED: [&'static str; 4] = ["pgx", "postgres", "mysql", "sqlite"];

    /// Maps a configured driver name to a driver.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pgx" | "postgres" => Some(Driver::Postgres),
            "mysql" => Some(Driver::MySql),
            "sqlite" => Some(Driver::Sqlite),
            _ => None,
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Postgres => write!(f, "postgres"),
            Driver::MySql => write!(f, "mysql"),
            Driver::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// InfluxDB 1.x sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InfluxV1 {
    /// Server base URL, e.g. `http://localhost:8086`.
    #[validate(url(message = "host must be a URL"))]
    pub host: String,
    /// Verify the server certificate.
    pub verify_ssl: bool,
    /// Target database.
    #[validate(length(min = 1, message = "database is required"))]
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for InfluxV1 {
    fn default() -> Self {
        Self {
            host: String::new(),
            verify_ssl: true,
            database: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// InfluxDB 2.x sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InfluxV2 {
    #[validate(url(message = "url must be a URL"))]
    pub url: String,
    #[validate(length(min = 1, message = "org is required"))]
    pub org: String,
    #[validate(length(min = 1, message = "bucket is required"))]
    pub bucket: String,
    pub token: String,
}

/// InfluxDB 3.x sink, addressed by a connection string such as
/// `https://host:8181?token=...&database=...`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InfluxV3 {
    #[validate(url(message = "url must be a connection URL"))]
    pub url: String,
}

/// A named probe definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Test {
    /// Template tests are only inherited from, never executed.
    pub is_template: bool,
    /// Source databases to query.
    pub databases: Vec<String>,
    /// InfluxDB 1.x sinks.
    pub influxes: Vec<String>,
    /// InfluxDB 2.x sinks.
    pub influxes2: Vec<String>,
    /// InfluxDB 3.x sinks.
    pub influxes3: Vec<String>,
    /// Target SQL databases (written through their `insert_sql`).
    pub target_databases: Vec<String>,
    /// Static tags added to every point.
    pub tags: BTreeMap<String, String>,
    /// Result columns treated as fields; every other column becomes a tag.
    pub fields: BTreeSet<String>,
    /// Execution priority, ascending.
    pub order: i64,
    /// Upper bound for one query execution.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Output series name.
    pub measurement: String,
    /// Name of the test to inherit unset attributes from.
    pub inherit_from: String,
    /// Probe statement.
    pub sql: String,
}

impl Test {
    /// Copies every attribute that is empty here from an already resolved ancestor.
    ///
    /// Non-empty attributes are kept whole; maps and lists are never merged.
    pub fn inherit(&mut self, ancestor: &Test) {
        if self.databases.is_empty() {
            self.databases = ancestor.databases.clone();
        }
        if self.influxes.is_empty() {
            self.influxes = ancestor.influxes.clone();
        }
        if self.influxes2.is_empty() {
            self.influxes2 = ancestor.influxes2.clone();
        }
        if self.influxes3.is_empty() {
            self.influxes3 = ancestor.influxes3.clone();
        }
        if self.target_databases.is_empty() {
            self.target_databases = ancestor.target_databases.clone();
        }
        if self.tags.is_empty() {
            self.tags = ancestor.tags.clone();
        }
        if self.fields.is_empty() {
            self.fields = ancestor.fields.clone();
        }
        if self.order == 0 {
            self.order = ancestor.order;
        }
        if self.timeout.is_none() {
            self.timeout = ancestor.timeout;
        }
        if self.measurement.is_empty() {
            self.measurement = ancestor.measurement.clone();
        }
        if self.sql.is_empty() {
            self.sql = ancestor.sql.clone();
        }
    }

    /// Whether any of the four sink lists names at least one sink.
    pub fn has_targets(&self) -> bool {
        !(self.influxes.is_empty()
            && self.influxes2.is_empty()
            && self.influxes3.is_empty()
            && self.target_databases.is_empty())
    }
}
