//! ステージ単体テスト用のフェイクコラボレーター。
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::clients::{
    DeliveryReceipt, LanguageModel, MailTransport, SearchOptions, SearchProvider, TimeSource,
    ZonedNow,
};
use crate::pipeline::state::{Brief, Document, Preferences};
use crate::store::FingerprintStore;
use crate::util::error::{ProviderError, StoreError, TransportError};

pub(crate) fn at(rfc3339: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(rfc3339).expect("valid timestamp")
}

/// 固定時刻を返す時計。`unknown` に含まれるゾーンはフォールバック扱い。
pub(crate) struct FixedClock {
    pub(crate) now: DateTime<FixedOffset>,
    pub(crate) unknown: Vec<String>,
}

impl FixedClock {
    pub(crate) fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now,
            unknown: Vec::new(),
        }
    }
}

impl TimeSource for FixedClock {
    fn now_in_zone(&self, zone: &str) -> ZonedNow {
        let fell_back = self.unknown.iter().any(|z| z == zone);
        ZonedNow {
            now: self.now,
            zone: if fell_back { "Asia/Kolkata".to_string() } else { zone.to_string() },
            fell_back,
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedSearch {
    pub(crate) responses: HashMap<String, Result<Vec<Document>, ProviderError>>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub(crate) fn with(mut self, query: &str, response: Result<Vec<Document>, ProviderError>) -> Self {
        self.responses.insert(query.to_string(), response);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(
        &self,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<Document>, ProviderError> {
        self.calls.lock().expect("calls lock").push(query.to_string());
        self.responses
            .get(query)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// 操作ごとに応答を差し替えられる言語モデル。要約はタイトル単位で指定する。
pub(crate) struct ScriptedModel {
    pub(crate) queries: Result<Vec<String>, ProviderError>,
    pub(crate) summaries: HashMap<String, Result<String, ProviderError>>,
    pub(crate) rendered: Result<String, ProviderError>,
    pub(crate) summarize_calls: Mutex<Vec<(String, String)>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self {
            queries: Ok(Vec::new()),
            summaries: HashMap::new(),
            rendered: Ok("<html><body>briefing</body></html>".to_string()),
            summarize_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn derive_queries(&self, _topics: &[String]) -> Result<Vec<String>, ProviderError> {
        self.queries.clone()
    }

    async fn summarize(
        &self,
        title: &str,
        excerpt: &str,
        _context: &Preferences,
    ) -> Result<String, ProviderError> {
        self.summarize_calls
            .lock()
            .expect("calls lock")
            .push((title.to_string(), excerpt.to_string()));
        self.summaries
            .get(title)
            .cloned()
            .unwrap_or_else(|| Ok(format!("Summary of {title}")))
    }

    async fn render(
        &self,
        _briefs: &[Brief],
        _preferences: &Preferences,
    ) -> Result<String, ProviderError> {
        self.rendered.clone()
    }
}

/// 各操作の初回呼び出しだけ再試行可能なエラーで失敗する言語モデル。
pub(crate) struct FlakyModel {
    queries: Vec<String>,
    rendered: String,
    derive_calls: AtomicUsize,
    render_calls: AtomicUsize,
}

impl FlakyModel {
    pub(crate) fn new(queries: &[&str], rendered: &str) -> Self {
        Self {
            queries: queries.iter().map(ToString::to_string).collect(),
            rendered: rendered.to_string(),
            derive_calls: AtomicUsize::new(0),
            render_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn derive_calls(&self) -> usize {
        self.derive_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }
}

fn first_call_fails<T>(counter: &AtomicUsize, value: T) -> Result<T, ProviderError> {
    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(ProviderError::Status {
            provider: "groq",
            status: 429,
            body: "rate limited".to_string(),
        })
    } else {
        Ok(value)
    }
}

#[async_trait]
impl LanguageModel for FlakyModel {
    async fn derive_queries(&self, _topics: &[String]) -> Result<Vec<String>, ProviderError> {
        first_call_fails(&self.derive_calls, self.queries.clone())
    }

    async fn summarize(
        &self,
        title: &str,
        _excerpt: &str,
        _context: &Preferences,
    ) -> Result<String, ProviderError> {
        Ok(format!("Summary of {title}"))
    }

    async fn render(
        &self,
        _briefs: &[Brief],
        _preferences: &Preferences,
    ) -> Result<String, ProviderError> {
        first_call_fails(&self.render_calls, self.rendered.clone())
    }
}

pub(crate) struct RecordingTransport {
    pub(crate) fail: bool,
    pub(crate) sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingTransport {
    pub(crate) fn accepting() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<DeliveryReceipt, TransportError> {
        if self.fail {
            return Err(TransportError::Rejected {
                recipient: recipient.to_string(),
                message: "mailbox unavailable".to_string(),
            });
        }
        let mut sent = self.sent.lock().expect("sent lock");
        sent.push((recipient.to_string(), subject.to_string(), html_body.to_string()));
        Ok(DeliveryReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

/// すべての操作が失敗するストア。
pub(crate) struct BrokenStore;

#[async_trait]
impl FingerprintStore for BrokenStore {
    async fn contains_fingerprint(&self, _fingerprint: &str) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn insert_fingerprint(&self, _fingerprint: &str) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn contains_delivery(
        &self,
        _recipient: &str,
        _delivery_id: &str,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn insert_delivery(
        &self,
        _recipient: &str,
        _delivery_id: &str,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }
}

pub(crate) fn brief(title: &str, url: &str) -> Brief {
    Brief {
        title: title.to_string(),
        url: url.to_string(),
        summary: format!("Summary of {title}"),
        content_fingerprint: format!("fp-{title}"),
        delivery_id: if url.is_empty() {
            format!("fp-{title}")
        } else {
            url.to_string()
        },
    }
}
