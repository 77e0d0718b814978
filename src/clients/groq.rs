/// Groq（OpenAI互換 Chat Completions）言語モデルクライアント。
use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LanguageModel;
use crate::pipeline::state::{Brief, Preferences};
use crate::util::error::ProviderError;
use crate::util::text::preview;

const PROVIDER: &str = "groq";

const QUERY_SYSTEM_PROMPT: &str = "You are a news search query generator. \
Given user topics of interest, generate 1-2 concise, effective search queries \
that will find relevant recent news articles. Return only the queries, one per line.";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a news summarizer. Generate concise, engaging \
1-2 line summaries of news articles in TLDR style. Focus on key facts and \
why it matters. Be unique - avoid repetition.";

const EMAIL_SYSTEM_PROMPT: &str = "You are an email content generator. Create a clean, \
professional HTML email with article summaries. Use simple HTML tags like \
<h2>, <p>, <a>, <ul>, <li>. Make it readable and engaging.";

/// Groqクライアントの設定。
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GroqClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl GroqClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(config: GroqConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build groq HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid groq base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
        })
    }

    /// システムプロンプトとユーザーメッセージで1回だけ補完を要求する。
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, ProviderError> {
        let url = self
            .base_url
            .join("chat/completions")
            .map_err(|err| ProviderError::transport(PROVIDER, err.to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
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
                body: preview(&body, 500),
            });
        }

        let payload = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| ProviderError::invalid_response(PROVIDER, err.to_string()))?;

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::invalid_response(PROVIDER, "no completion choices"))?;

        debug!(model = %self.model, chars = content.chars().count(), "groq completion received");
        Ok(content)
    }
}

/// 1行1クエリの応答を空行を除いて分解する。
pub(crate) fn parse_query_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn briefs_listing(briefs: &[Brief]) -> String {
    let mut listing = String::new();
    for (index, brief) in briefs.iter().enumerate() {
        let _ = write!(
            listing,
            "{}. {}\n   {}\n   URL: {}\n\n",
            index + 1,
            brief.title,
            brief.summary,
            brief.url
        );
    }
    listing
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn derive_queries(&self, topics: &[String]) -> Result<Vec<String>, ProviderError> {
        let user_message = format!(
            "User topics: {}\n\nGenerate search queries:",
            topics.join(", ")
        );
        let response = self.complete(QUERY_SYSTEM_PROMPT, &user_message).await?;
        Ok(parse_query_lines(&response))
    }

    async fn summarize(
        &self,
        title: &str,
        excerpt: &str,
        context: &Preferences,
    ) -> Result<String, ProviderError> {
        let mut user_message =
            format!("Article Title: {title}\n\nContent: {excerpt}\n\n");
        if !context.topics.is_empty() {
            let _ = write!(user_message, "Reader interests: {}\n\n", context.topics.join(", "));
        }
        user_message.push_str("Generate a 1-2 line summary:");
        self.complete(SUMMARY_SYSTEM_PROMPT, &user_message).await
    }

    async fn render(
        &self,
        briefs: &[Brief],
        preferences: &Preferences,
    ) -> Result<String, ProviderError> {
        let mut user_message = format!(
            "Create an HTML email with these article summaries:\n\n{}",
            briefs_listing(briefs)
        );
        if !preferences.topics.is_empty() {
            let _ = write!(
                user_message,
                "The reader follows: {}.\n",
                preferences.topics.join(", ")
            );
        }
        user_message.push_str("\nInclude a greeting and closing. Format as clean HTML.");
        self.complete(EMAIL_SYSTEM_PROMPT, &user_message).await
    }
}
