use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Url;
use texting_robots::Robot;
use tokio::sync::Mutex;
use tracing::debug;

use super::FetchEngine;
use crate::error::FetchError;
use crate::settings::FetchOptions;

/// Plain HTTP fetcher. No JavaScript runs, so it only sees server-rendered
/// markup.
pub struct HttpEngine {
    client: reqwest::Client,
    robots_agent: String,
    respect_robots: bool,
    // `None` means the origin has no usable robots.txt and everything is allowed.
    robots: Mutex<HashMap<String, Option<Arc<Robot>>>>,
}

impl HttpEngine {
    pub fn new(opts: &FetchOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if opts.bypass_cache {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let client = reqwest::Client::builder()
            .user_agent(opts.user_agent.clone())
            .default_headers(headers)
            .timeout(opts.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        // robots.txt groups name the product token, not the full UA string
        let robots_agent = opts
            .user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Self {
            client,
            robots_agent,
            respect_robots: opts.respect_robots,
            robots: Mutex::new(HashMap::new()),
        })
    }

    /// Rules for the URL's origin, fetched once and cached. An unreachable,
    /// missing or unparseable robots.txt allows everything.
    async fn robots_for(&self, url: &Url) -> Option<Arc<Robot>> {
        let origin = url.origin().ascii_serialization();
        let mut cache = self.robots.lock().await;
        if let Some(robot) = cache.get(&origin) {
            return robot.clone();
        }

        let robots_url = format!("{}/robots.txt", origin);
        let body = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.bytes().await.ok(),
            Ok(resp) => {
                debug!("robots.txt at {} returned {}", robots_url, resp.status());
                None
            }
            Err(e) => {
                debug!("robots.txt at {} unreachable: {}", robots_url, e);
                None
            }
        };

        let robot = body.and_then(|body| match Robot::new(&self.robots_agent, &body) {
            Ok(robot) => Some(Arc::new(robot)),
            Err(e) => {
                debug!("robots.txt at {} unparseable: {}", robots_url, e);
                None
            }
        });

        cache.insert(origin, robot.clone());
        robot
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Transport(e.to_string()))?;

        if self.respect_robots {
            if let Some(robot) = self.robots_for(&parsed).await {
                if !robot.allowed(parsed.as_str()) {
                    return Err(FetchError::RobotsDisallowed);
                }
            }
        }

        let resp = self.client.get(parsed).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(body)
    }
}
