//! パイプラインが利用する外部コラボレーターの境界。
//!
//! ステージはここで定義したトレイトにのみ依存し、具体的な実装
//! （Tavily、Groq、SMTP、アウトボックス、システム時計）は `ComponentRegistry` で注入される。

pub mod clock;
pub mod groq;
pub mod outbox;
pub mod smtp;
pub mod tavily;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::pipeline::state::{Brief, Document, Preferences};
use crate::util::error::{ProviderError, TransportError};

pub use clock::{ClockError, SystemClock};
pub use groq::{GroqClient, GroqConfig};
pub use outbox::OutboxTransport;
pub use smtp::{SmtpConfig, SmtpTransport};
pub use tavily::{TavilyClient, TavilyConfig};

/// 検索の深さ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDepth {
    Basic,
    Advanced,
}

impl SearchDepth {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub depth: SearchDepth,
    pub include_raw_content: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            depth: SearchDepth::Advanced,
            include_raw_content: true,
        }
    }
}

/// テキストクエリから候補記事を返す検索プロバイダ。
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Document>, ProviderError>;
}

/// クエリ生成・要約・メール本文生成を担う言語モデル。
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// トピック一覧から検索クエリを生成する（1行1クエリ）。
    async fn derive_queries(&self, topics: &[String]) -> Result<Vec<String>, ProviderError>;

    /// 記事タイトルと本文抜粋から1〜2行の要約を生成する。
    async fn summarize(
        &self,
        title: &str,
        excerpt: &str,
        context: &Preferences,
    ) -> Result<String, ProviderError>;

    /// 要約一覧から挨拶と結びを含むマークアップを生成する。
    async fn render(
        &self,
        briefs: &[Brief],
        preferences: &Preferences,
    ) -> Result<String, ProviderError>;
}

/// 送信確認。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// レンダリング済みメッセージを宛先に届けるトランスポート。
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// 指定タイムゾーンでの現在時刻。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonedNow {
    pub now: DateTime<FixedOffset>,
    /// 実際に使われたゾーン名
    pub zone: String,
    /// 要求されたゾーンが解決できずフォールバックした場合は true
    pub fell_back: bool,
}

/// 任意の名前付きタイムゾーンの現在時刻を返す時刻ソース。失敗しない。
pub trait TimeSource: Send + Sync {
    fn now_in_zone(&self, zone: &str) -> ZonedNow;
}
