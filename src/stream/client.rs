//! Filtered post stream: rule management and line-delimited ingestion.

use super::sink::PostSink;
use super::ticker::TickerExtractor;
use super::types::*;
use crate::error::StreamError;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, StreamError>;

/// Client for the stream rules and streaming endpoints.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client,
    bearer_token: String,
    rules_url: String,
    stream_url: String,
}

impl StreamClient {
    pub fn new(
        bearer_token: impl Into<String>,
        rules_url: impl Into<String>,
        stream_url: impl Into<String>,
    ) -> Result<Self> {
        // No overall timeout: the stream connection is held open indefinitely.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            bearer_token: bearer_token.into(),
            rules_url: rules_url.into(),
            stream_url: stream_url.into(),
        })
    }

    /// Currently installed filter rules.
    #[instrument(skip(self))]
    pub async fn get_rules(&self) -> Result<Vec<InstalledRule>> {
        let response = self
            .http
            .get(&self.rules_url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let rules: RulesResponse = Self::handle_response(response, StatusCode::OK).await?;
        debug!(count = rules.data.len(), "Fetched stream rules");
        Ok(rules.data)
    }

    /// Delete `rules`. Returns false without calling the API when there is nothing to delete.
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub async fn delete_all_rules(&self, rules: &[InstalledRule]) -> Result<bool> {
        if rules.is_empty() {
            return Ok(false);
        }

        let body = DeleteRules {
            delete: DeleteIds {
                ids: rules.iter().map(|r| r.id.clone()).collect(),
            },
        };
        let response = self
            .http
            .post(&self.rules_url)
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await?;

        Self::check_status(response, StatusCode::OK).await?;
        info!(count = rules.len(), "Deleted stream rules");
        Ok(true)
    }

    /// Install `rules`. The API answers 201 on success.
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub async fn set_rules(&self, rules: &[StreamRule]) -> Result<()> {
        let response = self
            .http
            .post(&self.rules_url)
            .bearer_auth(&self.bearer_token)
            .json(&AddRules { add: rules })
            .send()
            .await?;

        Self::check_status(response, StatusCode::CREATED).await?;
        info!(count = rules.len(), "Installed stream rules");
        Ok(())
    }

    /// Replace whatever is installed with `rules`.
    pub async fn reset_rules(&self, rules: &[StreamRule]) -> Result<()> {
        let current = self.get_rules().await?;
        self.delete_all_rules(&current).await?;
        self.set_rules(rules).await
    }

    /// Read the stream until the server closes it, handing each post to `sink`.
    /// Returns the number of posts handled.
    pub async fn run(&self, extractor: &TickerExtractor, sink: &dyn PostSink) -> Result<u64> {
        let response = self
            .http
            .get(&self.stream_url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        let response = Self::check_status(response, StatusCode::OK).await?;
        info!(url = %self.stream_url, "Stream handling started");

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut handled = 0u64;

        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if Self::handle_line(&line, extractor, sink).await? {
                    handled += 1;
                }
            }
        }

        // Trailing line without a newline.
        if Self::handle_line(&buffer, extractor, sink).await? {
            handled += 1;
        }

        warn!(handled, "Stream closed by server");
        Ok(handled)
    }

    /// Parse one line and pass it on. Keep-alive blank lines return false.
    async fn handle_line(
        line: &[u8],
        extractor: &TickerExtractor,
        sink: &dyn PostSink,
    ) -> Result<bool> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let record = parse_post(text, extractor)?;
        sink.handle(&record).await?;
        Ok(true)
    }

    async fn check_status(response: Response, expected: StatusCode) -> Result<Response> {
        let status = response.status();
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Request {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: Response,
        expected: StatusCode,
    ) -> Result<T> {
        let response = Self::check_status(response, expected).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Turn one stream line into a record stamped with the local time.
pub fn parse_post(line: &str, extractor: &TickerExtractor) -> Result<PostRecord> {
    let parsed: StreamLine = serde_json::from_str(line)?;
    let timeline = parsed
        .matching_rules
        .into_iter()
        .next()
        .map(|r| r.tag)
        .ok_or_else(|| StreamError::Decode(format!("post {} has no matching rule", parsed.data.id)))?;

    let ticker = extractor.extract_ticker(&parsed.data.text)?;

    Ok(PostRecord {
        tid: parsed.data.id,
        text: parsed.data.text,
        ticker,
        timeline,
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}
