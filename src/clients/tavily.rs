/// Tavily検索APIクライアント。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SearchOptions, SearchProvider};
use crate::pipeline::state::Document;
use crate::util::error::ProviderError;

const PROVIDER: &str = "tavily";

/// Tavilyクライアントの設定。
#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TavilyClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    raw_content: Option<String>,
}

impl From<SearchResult> for Document {
    fn from(result: SearchResult) -> Self {
        Self {
            title: result.title,
            url: result.url,
            content: result.content,
            published_date: result.published_date,
            score: result.score,
            raw_content: result.raw_content,
            content_fingerprint: None,
            delivery_id: None,
        }
    }
}

impl TavilyClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(config: TavilyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build tavily HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid tavily base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Document>, ProviderError> {
        let url = self
            .base_url
            .join("search")
            .map_err(|err| ProviderError::transport(PROVIDER, err.to_string()))?;

        let request = SearchRequest {
            query,
            max_results: options.max_results,
            search_depth: options.depth.as_str(),
            include_answer: false,
            include_raw_content: options.include_raw_content,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::from_reqwest(PROVIDER, &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: crate::util::text::preview(&body, 500),
            });
        }

        let payload = response
            .json::<SearchResponse>()
            .await
            .map_err(|err| ProviderError::invalid_response(PROVIDER, err.to_string()))?;

        let documents: Vec<Document> = payload.results.into_iter().map(Document::from).collect();
        debug!(query, count = documents.len(), "tavily search completed");
        Ok(documents)
    }
}
