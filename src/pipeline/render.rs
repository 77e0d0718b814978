use std::fmt::Write as _;
use std::sync::Arc;

use ammonia::clean_text;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::Stage;
use super::state::{Brief, PipelineStage, PipelineState};
use crate::clients::LanguageModel;
use crate::util::retry::RetryingClient;
use crate::util::text::looks_like_markup;

/// 要約一覧からメール本文を組み立てるステージ。必ず空でない本文を残す。
pub struct RenderStage {
    model: Arc<dyn LanguageModel>,
    retry: RetryingClient,
}

impl RenderStage {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryingClient) -> Self {
        Self { model, retry }
    }
}

/// マークアップでない応答を最小限のHTMLで包む。
#[must_use]
pub fn wrap_markup(body: &str) -> String {
    if looks_like_markup(body) {
        body.to_string()
    } else {
        format!("<html><body>{body}</body></html>")
    }
}

/// 言語モデルを使わずに要約一覧から組み立てる代替本文。
#[must_use]
pub fn fallback_markup(briefs: &[Brief]) -> String {
    let mut html = String::from("<html><body><h2>Your Daily Briefing</h2><ul>");
    for brief in briefs {
        let _ = write!(
            html,
            "<li><strong>{}</strong><br>{}<br><a href=\"{}\">Read more</a></li>",
            clean_text(&brief.title),
            clean_text(&brief.summary),
            clean_text(&brief.url)
        );
    }
    html.push_str("</ul></body></html>");
    html
}

#[async_trait]
impl Stage for RenderStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Render
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let model = &self.model;
        let briefs = &state.briefs;
        let preferences = state.preferences();
        let (result, attempts) = self
            .retry
            .call("render", || model.render(briefs, preferences))
            .await;

        let rendered = match result {
            Ok(body) if !body.trim().is_empty() => wrap_markup(body.trim()),
            Ok(_) => {
                warn!("language model returned an empty email body, using fallback");
                state.push_error("Email formatting error: empty response");
                fallback_markup(&state.briefs)
            }
            Err(err) => {
                warn!(error = %err, attempts, "email rendering failed, using fallback");
                state.push_error(format!("Email formatting error: {err}"));
                fallback_markup(&state.briefs)
            }
        };

        debug!(chars = rendered.chars().count(), "email rendered");
        state.rendered_message = rendered;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::Preferences;
    use crate::pipeline::test_support::{FlakyModel, ScriptedModel, brief};
    use crate::util::error::ProviderError;
    use crate::util::retry::RetryConfig;

    fn state_with_briefs(briefs: Vec<Brief>) -> PipelineState {
        let mut state = PipelineState::new("reader@example.com", Preferences::default());
        state.briefs = briefs;
        state
    }

    fn stage(model: Arc<dyn LanguageModel>) -> RenderStage {
        RenderStage::new(model, RetryingClient::new(RetryConfig::immediate(3)))
    }

    #[tokio::test]
    async fn markup_response_is_used_as_is() {
        let model = ScriptedModel {
            rendered: Ok("<h2>Hello</h2><p>News</p>".to_string()),
            ..ScriptedModel::default()
        };

        let result = stage(Arc::new(model))
            .run(state_with_briefs(vec![brief("a", "https://a.example")]))
            .await;

        assert_eq!(result.rendered_message(), "<h2>Hello</h2><p>News</p>");
    }

    #[tokio::test]
    async fn plain_text_response_is_wrapped() {
        let model = ScriptedModel {
            rendered: Ok("Good morning! Here is your news.".to_string()),
            ..ScriptedModel::default()
        };

        let result = stage(Arc::new(model))
            .run(state_with_briefs(vec![brief("a", "https://a.example")]))
            .await;

        assert_eq!(
            result.rendered_message(),
            "<html><body>Good morning! Here is your news.</body></html>"
        );
    }

    #[tokio::test]
    async fn provider_failure_uses_escaped_fallback() {
        let model = ScriptedModel {
            rendered: Err(ProviderError::transport("groq", "timeout")),
            ..ScriptedModel::default()
        };

        let result = stage(Arc::new(model))
            .run(state_with_briefs(vec![
                brief("<script>", "https://a.example"),
                brief("Second", "https://b.example"),
            ]))
            .await;

        let html = result.rendered_message();
        assert!(html.starts_with("<html><body><h2>Your Daily Briefing</h2>"));
        assert!(!html.contains("<script>"));
        assert!(html.find("https://a.example") < html.find("https://b.example"));
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].starts_with("Email formatting error"));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_before_falling_back() {
        let model = Arc::new(FlakyModel::new(&[], "<h2>Good morning</h2>"));

        let result = stage(Arc::clone(&model) as Arc<dyn LanguageModel>)
            .run(state_with_briefs(vec![brief("a", "https://a.example")]))
            .await;

        assert_eq!(result.rendered_message(), "<h2>Good morning</h2>");
        assert!(result.errors().is_empty());
        assert_eq!(model.render_calls(), 2);
    }
}
