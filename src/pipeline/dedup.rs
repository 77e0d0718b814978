//! グローバルなフィンガープリントと受信者ごとの配信履歴による重複排除。
//!
//! このステージは照会のみを行い、ストアへの書き込みは保存ステージと配信ステージに任せる。
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::Stage;
use super::state::{Document, PipelineStage, PipelineState};
use crate::store::FingerprintStore;

/// タイトルとURLを連結したもののSHA-256（16進64文字）。
#[must_use]
pub fn content_fingerprint(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// 受信者単位の配信ID。URLが空ならフィンガープリントを使う。
#[must_use]
pub fn delivery_id(url: &str, fingerprint: &str) -> String {
    if url.trim().is_empty() {
        fingerprint.to_string()
    } else {
        url.to_string()
    }
}

pub struct DedupStage {
    store: Arc<dyn FingerprintStore>,
}

impl DedupStage {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }

    /// ストアの照会に失敗した場合はエラーを記録して通過させる。
    async fn already_seen(
        &self,
        state: &mut PipelineState,
        document: &Document,
        fingerprint: &str,
        delivery: &str,
    ) -> bool {
        match self.store.contains_fingerprint(fingerprint).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "fingerprint lookup failed, keeping document");
                state.push_error(format!(
                    "Dedup check error for '{}': {err}",
                    document.title
                ));
                return false;
            }
        }

        let recipient = state.recipient().to_string();
        match self.store.contains_delivery(&recipient, delivery).await {
            Ok(seen) => seen,
            Err(err) => {
                warn!(error = %err, "delivery history lookup failed, keeping document");
                state.push_error(format!(
                    "Dedup check error for '{}': {err}",
                    document.title
                ));
                false
            }
        }
    }
}

#[async_trait]
impl Stage for DedupStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Dedup
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let raw = state.raw_documents.clone();
        let mut accepted = Vec::with_capacity(raw.len());
        let mut filtered = 0;

        for document in raw {
            let fingerprint = content_fingerprint(&document.title, &document.url);
            let delivery = delivery_id(&document.url, &fingerprint);

            if self
                .already_seen(&mut state, &document, &fingerprint, &delivery)
                .await
            {
                debug!(url = %document.url, "document already seen");
                filtered += 1;
                continue;
            }

            let mut document = document;
            document.content_fingerprint = Some(fingerprint);
            document.delivery_id = Some(delivery);
            accepted.push(document);
        }

        debug!(
            accepted = accepted.len(),
            filtered, "deduplication completed"
        );
        state.metadata.duplicates_filtered = Some(filtered);
        state.metadata.documents_after_dedup = Some(accepted.len());
        state.deduped_documents = accepted;
        state
    }
}
