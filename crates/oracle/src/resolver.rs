//! Resolvers: turn a [QueryRecord] into answer text using an external data source.

use crate::query::QueryRecord;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("data source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("data source returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// One kind of data source. The answer is returned untouched; encoding happens later.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &QueryRecord) -> Result<String, ResolverError>;
}

pub const WOLFRAM_DEFAULT_BASE_URL: &str = "https://api.wolframalpha.com";

/// Wolfram|Alpha Short Answers API: one GET per query with the raw query text.
#[derive(Debug, Clone)]
pub struct WolframResolver {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl WolframResolver {
    pub fn new(app_id: impl Into<String>, base_url: Option<String>) -> Result<Self, ResolverError> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| WOLFRAM_DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            app_id: app_id.into(),
        })
    }

    fn request(&self, query: &QueryRecord) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/v1/result", self.base_url))
            .query(&[("appid", self.app_id.as_str()), ("i", query.query.as_str())])
    }
}

#[async_trait]
impl Resolver for WolframResolver {
    async fn resolve(&self, query: &QueryRecord) -> Result<String, ResolverError> {
        tracing::debug!(query_id = %query.short_id(), query = %query.query, "querying wolfram");
        let resp = self.request(query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        // 501 is "No short answer available"; treat it like any other provider failure.
        if !status.is_success() {
            return Err(ResolverError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Always answers with the same text. Useful for health-check endpoints.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    answer: String,
}

impl StaticResolver {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _query: &QueryRecord) -> Result<String, ResolverError> {
        Ok(self.answer.clone())
    }
}
