//! InfluxDB 3.x client (`POST /api/v3/write_lp`).
//!
//! The sink is configured with a connection string carrying the token and
//! database as query parameters:
//! `https://host:8181?token=apiv3_xxx&database=metrics`.

use async_trait::async_trait;

use common::errors::{AppError, AppResult};
use common::models::InfluxV3;

use super::{endpoint, line_protocol, parse_url, send_lines, Point, TimeSeriesClient};

pub struct InfluxV3Client {
    http: reqwest::Client,
    write_url: reqwest::Url,
    token: Option<String>,
}

impl InfluxV3Client {
    pub fn new(http: reqwest::Client, def: &InfluxV3) -> AppResult<Self> {
        let base = parse_url(&def.url)?;
        let param = |key: &str| {
            base.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };
        let database = param("database").ok_or_else(|| {
            AppError::SinkConnection(format!("connection string {} has no database parameter", base))
        })?;
        let token = param("token");

        let mut write_url = endpoint(&base, "api/v3/write_lp");
        write_url
            .query_pairs_mut()
            .append_pair("db", &database)
            .append_pair("precision", "nanosecond");

        Ok(Self { http, write_url, token })
    }
}

#[async_trait]
impl TimeSeriesClient for InfluxV3Client {
    async fn write_batch(&mut self, points: &[Point]) -> AppResult<()> {
        let body = line_protocol::encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }
        let mut request = self.http.post(self.write_url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        send_lines(request, body).await
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
