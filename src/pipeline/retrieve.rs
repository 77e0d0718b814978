use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::Stage;
use super::state::{PipelineStage, PipelineState};
use crate::clients::{SearchOptions, SearchProvider};
use crate::util::retry::RetryingClient;

/// クエリごとに検索し、結果をそのままの順序で連結するステージ。
pub struct RetrievalStage {
    search: Arc<dyn SearchProvider>,
    options: SearchOptions,
    retry: RetryingClient,
}

impl RetrievalStage {
    pub fn new(search: Arc<dyn SearchProvider>, options: SearchOptions, retry: RetryingClient) -> Self {
        Self {
            search,
            options,
            retry,
        }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Retrieve
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let search = &self.search;
        let options = &self.options;
        let queries = state.queries.clone();

        for query in &queries {
            let (result, attempts) = self
                .retry
                .call("search", || search.search(query, options))
                .await;

            match result {
                Ok(documents) => {
                    info!(query = %query, count = documents.len(), attempts, "search completed");
                    state.raw_documents.extend(documents);
                }
                Err(err) => {
                    warn!(query = %query, attempts, error = %err, "search failed");
                    state.push_error(format!("Search error for '{query}': {err}"));
                }
            }
        }

        state.metadata.documents_found = Some(state.raw_documents.len());
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{Document, Preferences};
    use crate::pipeline::test_support::ScriptedSearch;
    use crate::util::error::ProviderError;
    use crate::util::retry::RetryConfig;

    fn state_with_queries(queries: &[&str]) -> PipelineState {
        let mut state = PipelineState::new("reader@example.com", Preferences::default());
        state.queries = queries.iter().map(ToString::to_string).collect();
        state
    }

    fn stage(search: Arc<ScriptedSearch>) -> RetrievalStage {
        RetrievalStage::new(
            search,
            SearchOptions::default(),
            RetryingClient::new(RetryConfig::immediate(3)),
        )
    }

    #[tokio::test]
    async fn concatenates_results_in_query_order() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with(
                    "first",
                    Ok(vec![
                        Document::new("A", "https://a.example", "a"),
                        Document::new("B", "https://b.example", "b"),
                    ]),
                )
                .with("second", Ok(vec![Document::new("A", "https://a.example", "a")])),
        );

        let result = stage(Arc::clone(&search))
            .run(state_with_queries(&["first", "second"]))
            .await;

        let titles: Vec<_> = result.raw_documents().iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "A"]);
        assert_eq!(result.metadata().documents_found, Some(3));
    }

    #[tokio::test]
    async fn failing_query_does_not_stop_later_queries() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with("broken", Err(ProviderError::transport("tavily", "timeout")))
                .with("working", Ok(vec![Document::new("C", "https://c.example", "c")])),
        );

        let result = stage(Arc::clone(&search))
            .run(state_with_queries(&["broken", "working"]))
            .await;

        assert_eq!(result.raw_documents().len(), 1);
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].contains("'broken'"));
        // 3 attempts on the retryable failure, 1 on the working query
        assert_eq!(search.calls().len(), 4);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_attempted_once() {
        let search = Arc::new(ScriptedSearch::default().with(
            "denied",
            Err(ProviderError::Status {
                provider: "tavily",
                status: 401,
                body: String::new(),
            }),
        ));

        let result = stage(Arc::clone(&search))
            .run(state_with_queries(&["denied"]))
            .await;

        assert_eq!(search.calls(), ["denied"]);
        assert_eq!(result.metadata().documents_found, Some(0));
    }
}
