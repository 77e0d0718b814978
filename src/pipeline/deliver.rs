use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::Stage;
use super::state::{PipelineStage, PipelineState};
use crate::clients::MailTransport;
use crate::store::FingerprintStore;
use crate::util::redact::redact;

/// レンダリング済み本文を送信し、成功時のみ受信者の配信履歴を更新するステージ。
pub struct DeliveryStage {
    transport: Arc<dyn MailTransport>,
    store: Arc<dyn FingerprintStore>,
    subject: String,
}

impl DeliveryStage {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        store: Arc<dyn FingerprintStore>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Stage for DeliveryStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Deliver
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let recipient = state.recipient().to_string();

        if state.rendered_message.is_empty() {
            info!(recipient = %redact(&recipient), "no rendered message, skipping delivery");
            return state;
        }

        match self
            .transport
            .send(&recipient, &self.subject, &state.rendered_message)
            .await
        {
            Ok(receipt) => {
                info!(
                    recipient = %redact(&recipient),
                    message_id = %receipt.message_id,
                    articles = state.briefs.len(),
                    "briefing delivered"
                );
                let briefs = state.briefs.clone();
                for brief in &briefs {
                    if let Err(err) = self.store.insert_delivery(&recipient, &brief.delivery_id).await {
                        warn!(error = %err, "failed to record delivery history");
                        state.push_error(format!(
                            "Delivery history error for '{}': {err}",
                            brief.delivery_id
                        ));
                    }
                }
                state.metadata.email_sent = Some(true);
                state.metadata.email_message_id = Some(receipt.message_id);
            }
            Err(err) => {
                warn!(recipient = %redact(&recipient), error = %err, "briefing delivery failed");
                state.push_error(format!("Email error: {err}"));
                state.metadata.email_sent = Some(false);
            }
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::Preferences;
    use crate::pipeline::test_support::{RecordingTransport, brief};
    use crate::store::InMemoryFingerprintStore;

    fn rendered_state() -> PipelineState {
        let mut state = PipelineState::new("reader@example.com", Preferences::default());
        state.briefs = vec![brief("a", "https://a.example"), brief("b", "")];
        state.rendered_message = "<html><body>news</body></html>".to_string();
        state
    }

    #[tokio::test]
    async fn success_records_delivery_ids() {
        let store = Arc::new(InMemoryFingerprintStore::new());
        let transport = Arc::new(RecordingTransport::accepting());
        let stage = DeliveryStage::new(
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            Arc::clone(&store) as Arc<dyn FingerprintStore>,
            "Your Daily AI Briefing",
        );

        let result = stage.run(rendered_state()).await;

        assert_eq!(result.metadata().email_sent, Some(true));
        assert_eq!(result.metadata().email_message_id.as_deref(), Some("msg-1"));
        assert_eq!(store.delivery_count("reader@example.com").expect("count"), 2);
        assert!(
            store
                .contains_delivery("reader@example.com", "https://a.example")
                .await
                .expect("lookup")
        );
        let sent = transport.sent.lock().expect("sent lock");
        assert_eq!(sent[0].1, "Your Daily AI Briefing");
    }

    #[tokio::test]
    async fn failure_leaves_history_untouched() {
        let store = Arc::new(InMemoryFingerprintStore::new());
        let stage = DeliveryStage::new(
            Arc::new(RecordingTransport::failing()),
            Arc::clone(&store) as Arc<dyn FingerprintStore>,
            "subject",
        );

        let result = stage.run(rendered_state()).await;

        assert_eq!(result.metadata().email_sent, Some(false));
        assert!(result.metadata().email_message_id.is_none());
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].starts_with("Email error"));
        assert_eq!(store.delivery_count("reader@example.com").expect("count"), 0);
    }

    #[tokio::test]
    async fn empty_message_is_not_sent() {
        let transport = Arc::new(RecordingTransport::accepting());
        let stage = DeliveryStage::new(
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            Arc::new(InMemoryFingerprintStore::new()),
            "subject",
        );
        let state = PipelineState::new("reader@example.com", Preferences::default());

        let result = stage.run(state).await;

        assert_eq!(transport.sent_count(), 0);
        assert!(result.metadata().email_sent.is_none());
        assert!(result.errors().is_empty());
    }
}
