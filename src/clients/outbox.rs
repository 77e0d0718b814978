/// レンダリング済みメールをディレクトリに書き出すトランスポート。
///
/// HTML本文とプレーンテキスト版を保存し、生成したメッセージIDを送信確認として返す。
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{DeliveryReceipt, MailTransport};
use crate::util::error::TransportError;
use crate::util::redact::redact;

const TEXT_WIDTH: usize = 80;

#[derive(Debug, Clone)]
pub struct OutboxTransport {
    directory: PathBuf,
    from_address: String,
}

impl OutboxTransport {
    pub fn new(directory: impl Into<PathBuf>, from_address: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            from_address: from_address.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn safe_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub(super) fn plain_text_alternative(html_body: &str) -> String {
    html2text::from_read(html_body.as_bytes(), TEXT_WIDTH).unwrap_or_default()
}

#[async_trait]
impl MailTransport for OutboxTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<DeliveryReceipt, TransportError> {
        if recipient.trim().is_empty() {
            return Err(TransportError::Rejected {
                recipient: recipient.to_string(),
                message: "empty recipient address".to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.directory).await?;

        let id = Uuid::now_v7();
        let message_id = format!("outbox-{id}");
        let stem = format!(
            "email_{}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            safe_file_component(recipient),
            id.simple()
        );

        let header = format!(
            "Message-ID: <{message_id}>\nFrom: {}\nTo: {recipient}\nSubject: {subject}\n\n",
            self.from_address
        );
        let text_body = format!("{header}{}", plain_text_alternative(html_body));

        let html_path = self.directory.join(format!("{stem}.html"));
        let text_path = self.directory.join(format!("{stem}.txt"));
        tokio::fs::write(&html_path, html_body).await?;
        tokio::fs::write(&text_path, text_body).await?;

        info!(
            recipient = %redact(recipient),
            %message_id,
            path = %html_path.display(),
            "briefing written to outbox"
        );

        Ok(DeliveryReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_writes_html_and_text_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = OutboxTransport::new(dir.path().join("emails"), "noreply@example.com");

        let receipt = transport
            .send(
                "reader@example.com",
                "Your Daily AI Briefing",
                "<html><body><h2>Hello</h2><p>News</p></body></html>",
            )
            .await
            .expect("send succeeds");

        assert!(receipt.message_id.starts_with("outbox-"));

        let mut entries: Vec<_> = std::fs::read_dir(transport.directory())
            .expect("outbox exists")
            .map(|entry| entry.expect("entry").path())
            .collect();
        entries.sort();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|p| p.extension().is_some_and(|e| e == "html")));
        let text_file = entries
            .iter()
            .find(|p| p.extension().is_some_and(|e| e == "txt"))
            .expect("text alternative");
        let text = std::fs::read_to_string(text_file).expect("readable");
        assert!(text.contains("Subject: Your Daily AI Briefing"));
        assert!(text.contains("News"));
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = OutboxTransport::new(dir.path(), "noreply@example.com");

        let error = transport
            .send("  ", "subject", "<p>x</p>")
            .await
            .expect_err("empty recipient");

        assert!(matches!(error, TransportError::Rejected { .. }));
    }

    #[test]
    fn file_component_strips_address_punctuation() {
        assert_eq!(safe_file_component("a.b@c.io"), "a_b_c_io");
    }
}
