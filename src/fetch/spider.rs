use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use super::FetchEngine;
use crate::error::FetchError;
use crate::settings::FetchOptions;

const BASE_BACKOFF_MS: u64 = 2000;

/// Rendered-HTML fetcher backed by spider.cloud's headless browsers.
pub struct SpiderEngine {
    spider: Spider,
    bypass_cache: bool,
    respect_robots: bool,
    retries: u32,
}

impl SpiderEngine {
    pub fn from_env(opts: &FetchOptions) -> Result<Self> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .context("SPIDER_API_KEY environment variable must be set for the spider engine")?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;

        Ok(Self {
            spider,
            bypass_cache: opts.bypass_cache,
            respect_robots: opts.respect_robots,
            retries: opts.retries,
        })
    }

    fn params(&self) -> RequestParams {
        RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            cache: Some(!self.bypass_cache),
            respect_robots: Some(self.respect_robots),
            ..Default::default()
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(self.params()), "application/json")
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        debug!("{} answered in {}ms", url, start.elapsed().as_millis());

        parse_response(response)
    }
}

#[async_trait]
impl FetchEngine for SpiderEngine {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            let result = self.fetch_once(url).await;
            let should_retry = match &result {
                Err(FetchError::Status(code)) => *code == 429 || *code >= 500,
                _ => false,
            };

            if !should_retry || attempt >= self.retries {
                return result;
            }

            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
            warn!(
                "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                url,
                attempt + 1,
                self.retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// Pull the page body out of spider's `[{ content, status, error }]` reply.
fn parse_response(value: serde_json::Value) -> Result<String, FetchError> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };

    let first = parsed
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or_else(|| FetchError::Engine("unexpected response shape".into()))?;

    if let Some(err) = first.get("error").and_then(|e| e.as_str()) {
        if !err.is_empty() {
            return Err(FetchError::Engine(err.to_string()));
        }
    }

    if let Some(status) = first.get("status").and_then(|s| s.as_u64()) {
        if status >= 400 {
            return Err(FetchError::Status(status as u16));
        }
    }

    first
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
        .ok_or(FetchError::EmptyBody)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_is_returned() {
        let v = json!([{ "content": "<html>ok</html>", "status": 200 }]);
        assert_eq!(parse_response(v).unwrap(), "<html>ok</html>");
    }

    #[test]
    fn stringified_payload_is_decoded() {
        let v = json!(r#"[{"content":"<p>x</p>","status":200}]"#);
        assert_eq!(parse_response(v).unwrap(), "<p>x</p>");
    }

    #[test]
    fn http_error_status_is_a_failure() {
        let v = json!([{ "content": "blocked", "status": 403 }]);
        assert_eq!(parse_response(v), Err(FetchError::Status(403)));
    }

    #[test]
    fn engine_error_and_missing_content() {
        let v = json!([{ "error": "timeout", "status": 200 }]);
        assert_eq!(parse_response(v), Err(FetchError::Engine("timeout".into())));

        let v = json!([{ "status": 200 }]);
        assert_eq!(parse_response(v), Err(FetchError::EmptyBody));

        assert!(matches!(parse_response(json!({})), Err(FetchError::Engine(_))));
    }
}
