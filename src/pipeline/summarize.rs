use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Stage;
use super::state::{Brief, PipelineStage, PipelineState};
use crate::clients::LanguageModel;
use crate::util::error::ProviderError;
use crate::util::retry::RetryingClient;
use crate::util::text::{strip_quotes, truncate_chars};

/// 重複排除を通過した記事ごとに短い要約を生成するステージ。
///
/// 要約に失敗した記事はエラーを記録して読み飛ばす。
pub struct SummarizeStage {
    model: Arc<dyn LanguageModel>,
    retry: RetryingClient,
    excerpt_chars: usize,
}

impl SummarizeStage {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryingClient, excerpt_chars: usize) -> Self {
        Self {
            model,
            retry,
            excerpt_chars,
        }
    }
}

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Summarize
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let model = &self.model;
        let preferences = state.preferences().clone();
        let documents = state.deduped_documents.clone();
        let mut briefs = Vec::with_capacity(documents.len());

        for document in documents {
            let excerpt = truncate_chars(&document.content, self.excerpt_chars);
            let title = document.title.as_str();
            let (result, attempts) = self
                .retry
                .call("summarize", || model.summarize(title, excerpt, &preferences))
                .await;

            let summary = result.and_then(|raw| {
                let cleaned = strip_quotes(&raw);
                if cleaned.is_empty() {
                    Err(ProviderError::invalid_response("summarizer", "empty summary"))
                } else {
                    Ok(cleaned.to_string())
                }
            });

            match summary {
                Ok(summary) => {
                    debug!(title = %document.title, attempts, "summary generated");
                    // 重複排除ステージで必ず付与されている
                    let fingerprint = document.content_fingerprint.clone().unwrap_or_default();
                    let delivery_id = document
                        .delivery_id
                        .clone()
                        .unwrap_or_else(|| fingerprint.clone());
                    briefs.push(Brief {
                        title: document.title.clone(),
                        url: document.url.clone(),
                        summary,
                        content_fingerprint: fingerprint,
                        delivery_id,
                    });
                }
                Err(err) => {
                    warn!(title = %document.title, attempts, error = %err, "summarization failed, skipping document");
                    state.push_error(format!(
                        "Summarization error for '{}': {err}",
                        document.title
                    ));
                }
            }
        }

        state.metadata.summaries_generated = Some(briefs.len());
        state.briefs = briefs;
        state
    }
}
