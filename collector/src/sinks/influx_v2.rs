//! InfluxDB 2.x client (`POST /api/v2/write`).

use async_trait::async_trait;

use common::errors::AppResult;
use common::models::InfluxV2;

use super::{endpoint, line_protocol, parse_url, send_lines, Point, TimeSeriesClient};

pub struct InfluxV2Client {
    http: reqwest::Client,
    write_url: reqwest::Url,
    token: String,
}

impl InfluxV2Client {
    pub fn new(http: reqwest::Client, def: &InfluxV2) -> AppResult<Self> {
        let mut write_url = endpoint(&parse_url(&def.url)?, "api/v2/write");
        write_url
            .query_pairs_mut()
            .append_pair("org", &def.org)
            .append_pair("bucket", &def.bucket)
            .append_pair("precision", "ns");

        Ok(Self {
            http,
            write_url,
            token: def.token.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesClient for InfluxV2Client {
    async fn write_batch(&mut self, points: &[Point]) -> AppResult<()> {
        let body = line_protocol::encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .post(self.write_url.clone())
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token));
        send_lines(request, body).await
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
