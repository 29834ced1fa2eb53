pub mod http;
#[cfg(test)]
pub mod scripted;
pub mod spider;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::settings::{EngineKind, FetchOptions};
use crate::error::FetchError;

/// Resolves one URL to page HTML. Implementations own timeouts, cache
/// policy and robots.txt compliance; the dispatcher only sees the outcome.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Outcome of fetching a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success { url: String, html: String },
    Failure { url: String, error: FetchError },
}

impl FetchResult {
    pub fn url(&self) -> &str {
        match self {
            FetchResult::Success { url, .. } | FetchResult::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Start the configured engine. Failing here aborts the run before any URL
/// is fetched.
pub fn build_engine(opts: &FetchOptions) -> Result<Arc<dyn FetchEngine>> {
    Ok(match opts.engine {
        EngineKind::Http => Arc::new(http::HttpEngine::new(opts)?),
        EngineKind::Spider => Arc::new(spider::SpiderEngine::from_env(opts)?),
    })
}
