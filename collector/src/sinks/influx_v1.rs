//! InfluxDB 1.x client (`POST /write`).

use async_trait::async_trait;

use common::errors::AppResult;
use common::models::InfluxV1;

use super::{endpoint, line_protocol, parse_url, send_lines, Point, TimeSeriesClient};

pub struct InfluxV1Client {
    http: reqwest::Client,
    write_url: reqwest::Url,
    credentials: Option<(String, String)>,
}

impl InfluxV1Client {
    pub fn new(http: reqwest::Client, def: &InfluxV1) -> AppResult<Self> {
        let mut write_url = endpoint(&parse_url(&def.host)?, "write");
        write_url
            .query_pairs_mut()
            .append_pair("db", &def.database)
            .append_pair("precision", "ns");

        let credentials = (!def.username.is_empty()).then(|| (def.username.clone(), def.password.clone()));
        Ok(Self {
            http,
            write_url,
            credentials,
        })
    }
}

#[async_trait]
impl TimeSeriesClient for InfluxV1Client {
    async fn write_batch(&mut self, points: &[Point]) -> AppResult<()> {
        let body = line_protocol::encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }
        let mut request = self.http.post(self.write_url.clone());
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }
        send_lines(request, body).await
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
