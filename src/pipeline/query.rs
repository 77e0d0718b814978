use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Stage;
use super::state::{PipelineStage, PipelineState};
use crate::clients::LanguageModel;
use crate::util::retry::RetryingClient;

/// トピックから検索クエリを生成するステージ。
///
/// 言語モデルが失敗した場合は `"{topic} news"` で代替し、実行は止めない。
pub struct QueryDerivationStage {
    model: Arc<dyn LanguageModel>,
    retry: RetryingClient,
    max_queries: usize,
}

impl QueryDerivationStage {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryingClient, max_queries: usize) -> Self {
        Self {
            model,
            retry,
            max_queries,
        }
    }
}

/// 言語モデルを使わない決定的な代替クエリ。
#[must_use]
pub fn fallback_queries(topics: &[String], max_queries: usize) -> Vec<String> {
    topics
        .iter()
        .take(max_queries)
        .map(|topic| format!("{topic} news"))
        .collect()
}

#[async_trait]
impl Stage for QueryDerivationStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::DeriveQueries
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let topics = state.preferences().topics.clone();
        if topics.is_empty() {
            debug!("no topics configured, skipping query derivation");
            state.queries = Vec::new();
            state.metadata.queries_generated = Some(0);
            return state;
        }

        let model = &self.model;
        let (result, attempts) = self
            .retry
            .call("derive_queries", || model.derive_queries(&topics))
            .await;

        let queries = match result {
            Ok(generated) => {
                let usable: Vec<String> = generated
                    .iter()
                    .map(|query| query.trim())
                    .filter(|query| !query.is_empty())
                    .take(self.max_queries)
                    .map(ToString::to_string)
                    .collect();
                if usable.is_empty() {
                    warn!("language model returned no usable queries, using topic fallback");
                    state.push_error("Query analysis error: no usable queries returned");
                    fallback_queries(&topics, self.max_queries)
                } else {
                    usable
                }
            }
            Err(err) => {
                warn!(error = %err, attempts, "query derivation failed, using topic fallback");
                state.push_error(format!("Query analysis error: {err}"));
                fallback_queries(&topics, self.max_queries)
            }
        };

        debug!(count = queries.len(), "search queries derived");
        state.metadata.queries_generated = Some(queries.len());
        state.queries = queries;
        state
    }
}
