//! SMTPリレー経由でメールを送るトランスポート。
//!
//! 本文は `multipart/alternative`（プレーンテキスト + HTML）で組み立てる。
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;
use uuid::Uuid;

use super::outbox::plain_text_alternative;
use super::{DeliveryReceipt, MailTransport};
use crate::util::error::TransportError;
use crate::util::redact::redact;

/// SMTPトランスポートの設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// false の場合は平文接続（ローカルのメールキャッチャー向け）
    pub starttls: bool,
    pub timeout: Duration,
}

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    message_domain: String,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// # Errors
    /// 送信元アドレスが不正、またはSTARTTLSリレーの構築に失敗した場合はエラーを返す。
    pub fn new(config: SmtpConfig, from_address: &str) -> Result<Self, TransportError> {
        let from: Mailbox = from_address
            .parse()
            .map_err(|err| TransportError::InvalidAddress {
                address: from_address.to_string(),
                message: format!("{err}"),
            })?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        };
        let builder = builder.port(config.port).timeout(Some(config.timeout));
        let builder = match (config.username, config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username, password))
            }
            _ => builder,
        };

        let message_domain = from.email.domain().to_string();
        Ok(Self {
            mailer: builder.build(),
            from,
            message_domain,
        })
    }

    fn compose(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(Message, String), TransportError> {
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|err| TransportError::Rejected {
                recipient: recipient.to_string(),
                message: format!("invalid recipient address: {err}"),
            })?;

        let message_id = format!("<{}@{}>", Uuid::now_v7().simple(), self.message_domain);
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                plain_text_alternative(html_body),
                html_body.to_string(),
            ))
            .map_err(|err| TransportError::Rejected {
                recipient: recipient.to_string(),
                message: format!("failed to build message: {err}"),
            })?;

        Ok((message, message_id))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<DeliveryReceipt, TransportError> {
        let (message, message_id) = self.compose(recipient, subject, html_body)?;

        let response = self.mailer.send(message).await?;
        info!(
            recipient = %redact(recipient),
            %message_id,
            code = %response.code(),
            "briefing sent via smtp"
        );

        Ok(DeliveryReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn plain_config(port: u16) -> SmtpConfig {
        SmtpConfig {
            server: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            starttls: false,
            timeout: Duration::from_secs(5),
        }
    }

    /// 1接続だけ受け付け、受信したコマンドとDATAを記録する最小のSMTPサーバー。
    async fn recording_smtp_server() -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            write
                .write_all(b"220 localhost ESMTP test\r\n")
                .await
                .expect("greeting");

            let mut transcript = String::new();
            let mut in_data = false;
            while let Some(line) = lines.next_line().await.expect("read line") {
                transcript.push_str(&line);
                transcript.push('\n');

                if in_data {
                    if line == "." {
                        in_data = false;
                        write.write_all(b"250 2.0.0 queued\r\n").await.expect("reply");
                    }
                    continue;
                }

                let verb = line.get(..4).unwrap_or_default().to_ascii_uppercase();
                let reply: &[u8] = match verb.as_str() {
                    "EHLO" | "HELO" => b"250 localhost\r\n",
                    "DATA" => {
                        in_data = true;
                        b"354 end data with <CR><LF>.<CR><LF>\r\n"
                    }
                    "QUIT" => {
                        write.write_all(b"221 bye\r\n").await.expect("reply");
                        break;
                    }
                    _ => b"250 OK\r\n",
                };
                write.write_all(reply).await.expect("reply");
            }
            transcript
        });

        (port, handle)
    }

    #[tokio::test]
    async fn sends_multipart_message_to_relay() {
        let (port, server) = recording_smtp_server().await;
        let transport =
            SmtpTransport::new(plain_config(port), "briefing@example.com").expect("transport");

        let receipt = transport
            .send(
                "reader@example.com",
                "Your Daily AI Briefing",
                "<html><body><h2>Hello</h2><p>News</p></body></html>",
            )
            .await
            .expect("relay accepts message");

        let transcript = server.await.expect("server task");
        assert!(receipt.message_id.ends_with("@example.com>"));
        assert!(transcript.contains("MAIL FROM:<briefing@example.com>"));
        assert!(transcript.contains("RCPT TO:<reader@example.com>"));
        assert!(transcript.contains("Subject: Your Daily AI Briefing"));
        assert!(transcript.contains("multipart/alternative"));
        assert!(transcript.contains("text/plain"));
        assert!(transcript.contains("text/html"));
        assert!(transcript.contains(&receipt.message_id));
    }

    #[tokio::test]
    async fn unreachable_relay_is_an_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let transport =
            SmtpTransport::new(plain_config(port), "briefing@example.com").expect("transport");

        let error = transport
            .send("reader@example.com", "subject", "<p>x</p>")
            .await
            .expect_err("nothing is listening");

        assert!(matches!(error, TransportError::Smtp(_)));
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_before_connecting() {
        let transport =
            SmtpTransport::new(plain_config(1), "briefing@example.com").expect("transport");

        let error = transport
            .send("not an address", "subject", "<p>x</p>")
            .await
            .expect_err("invalid address");

        assert!(matches!(error, TransportError::Rejected { .. }));
    }

    #[test]
    fn invalid_sender_is_a_construction_error() {
        let error = SmtpTransport::new(plain_config(25), "nobody").expect_err("bad sender");

        assert!(matches!(error, TransportError::InvalidAddress { .. }));
    }
}
