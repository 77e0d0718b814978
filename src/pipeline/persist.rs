use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Stage;
use super::state::{PipelineStage, PipelineState};
use crate::store::FingerprintStore;

/// 要約済み記事のフィンガープリントをグローバル集合に登録するステージ。
///
/// グローバル集合を書き換えるのはこのステージだけ。
pub struct StoreStage {
    store: Arc<dyn FingerprintStore>,
}

impl StoreStage {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for StoreStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Store
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let briefs = state.briefs.clone();
        let mut stored = 0;

        for brief in &briefs {
            match self.store.insert_fingerprint(&brief.content_fingerprint).await {
                Ok(inserted) => {
                    debug!(title = %brief.title, inserted, "fingerprint stored");
                    stored += 1;
                }
                Err(err) => {
                    warn!(title = %brief.title, error = %err, "fingerprint store write failed");
                    state.push_error(format!("Store error for '{}': {err}", brief.title));
                }
            }
        }

        state.metadata.articles_stored = Some(stored);
        state
    }
}
