//! Time-series sinks.
//!
//! All three InfluxDB generations accept line protocol over HTTP; they differ
//! in write endpoint, addressing and authentication.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::errors::{AppError, AppResult};
use common::models::{FieldValue, InfluxV1, InfluxV2, InfluxV3, TestResult};

pub mod influx_v1;
pub mod influx_v2;
pub mod influx_v3;
pub mod line_protocol;

pub use influx_v1::InfluxV1Client;
pub use influx_v2::InfluxV2Client;
pub use influx_v3::InfluxV3Client;

/// Sink family, named after its configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFamily {
    InfluxV1,
    InfluxV2,
    InfluxV3,
    Database,
}

impl fmt::Display for SinkFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkFamily::InfluxV1 => write!(f, "influx"),
            SinkFamily::InfluxV2 => write!(f, "influx2"),
            SinkFamily::InfluxV3 => write!(f, "influx3"),
            SinkFamily::Database => write!(f, "database"),
        }
    }
}

/// Definition of one time-series sink instance.
#[derive(Debug, Clone)]
pub enum SinkTarget {
    V1(InfluxV1),
    V2(InfluxV2),
    V3(InfluxV3),
}

impl SinkTarget {
    pub fn family(&self) -> SinkFamily {
        match self {
            SinkTarget::V1(_) => SinkFamily::InfluxV1,
            SinkTarget::V2(_) => SinkFamily::InfluxV2,
            SinkTarget::V3(_) => SinkFamily::InfluxV3,
        }
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn from_result(result: &TestResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: result.measurement.clone(),
            tags: result.tags.clone(),
            fields: result.fields.clone(),
            timestamp,
        }
    }
}

/// A connected time-series client.
#[async_trait]
pub trait TimeSeriesClient: Send {
    /// Writes all points in a single request.
    async fn write_batch(&mut self, points: &[Point]) -> AppResult<()>;

    async fn close(&mut self) -> AppResult<()>;
}

/// Builds clients for sink definitions.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self, name: &str, target: &SinkTarget) -> AppResult<Box<dyn TimeSeriesClient>>;
}

/// reqwest-backed connector for every InfluxDB generation.
pub struct HttpSinkConnector {
    timeout: Duration,
}

impl HttpSinkConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn http_client(&self, name: &str, verify_ssl: bool) -> AppResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| AppError::SinkConnection(format!("could not build HTTP client for {}: {}", name, e)))
    }
}

#[async_trait]
impl SinkConnector for HttpSinkConnector {
    async fn connect(&self, name: &str, target: &SinkTarget) -> AppResult<Box<dyn TimeSeriesClient>> {
        let client: Box<dyn TimeSeriesClient> = match target {
            SinkTarget::V1(def) => Box::new(InfluxV1Client::new(self.http_client(name, def.verify_ssl)?, def)?),
            SinkTarget::V2(def) => Box::new(InfluxV2Client::new(self.http_client(name, true)?, def)?),
            SinkTarget::V3(def) => Box::new(InfluxV3Client::new(self.http_client(name, true)?, def)?),
        };
        Ok(client)
    }
}

/// Parses a configured base URL.
fn parse_url(raw: &str) -> AppResult<reqwest::Url> {
    reqwest::Url::parse(raw).map_err(|e| AppError::SinkConnection(format!("invalid url {}: {}", raw, e)))
}

/// Appends `segment` to the path of `base`, dropping any query string.
fn endpoint(base: &reqwest::Url, segment: &str) -> reqwest::Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), segment);
    url.set_path(&path);
    url.set_query(None);
    url
}

/// Sends an encoded batch and maps non-success responses to `SinkWrite`.
async fn send_lines(request: reqwest::RequestBuilder, body: String) -> AppResult<()> {
    let response = request
        .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::SinkWrite(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let detail = response.text().await.unwrap_or_default();
    Err(AppError::SinkWrite(format!("{}: {}", status, detail.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names() {
        assert_eq!(SinkFamily::InfluxV1.to_string(), "influx");
        assert_eq!(SinkFamily::InfluxV3.to_string(), "influx3");
        assert_eq!(SinkFamily::Database.to_string(), "database");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = parse_url("http://proxy:8080/influx/?token=x").unwrap();
        assert_eq!(endpoint(&base, "write").as_str(), "http://proxy:8080/influx/write");
        let base = parse_url("http://localhost:8086").unwrap();
        assert_eq!(endpoint(&base, "api/v2/write").as_str(), "http://localhost:8086/api/v2/write");
    }

    #[test]
    fn test_point_copies_result() {
        let mut result = TestResult {
            measurement: "m".into(),
            ..Default::default()
        };
        result.fields.insert("v".into(), FieldValue::Int(1));
        let now = Utc::now();
        let point = Point::from_result(&result, now);
        assert_eq!(point.measurement, "m");
        assert_eq!(point.fields["v"], FieldValue::Int(1));
        assert_eq!(point.timestamp, now);
    }
}
