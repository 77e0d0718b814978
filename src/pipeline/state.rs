//! パイプライン全体を流れる単一の状態レコード。
//!
//! 各ステージはこのレコードを受け取り、自分の担当フィールドとメタデータのみを書き換えて返す。
//! `errors` は追記専用で、どのステージも既存のエントリを削除しない。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_schedule_time() -> String {
    "09:00".to_string()
}

/// 受信者ごとの購読設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub topics: Vec<String>,
    /// IANAタイムゾーン名（例: `America/New_York`）
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// 24時間表記の "HH:MM"
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
}

impl Preferences {
    pub fn new(
        topics: Vec<String>,
        timezone: impl Into<String>,
        schedule_time: impl Into<String>,
    ) -> Self {
        Self {
            topics,
            timezone: timezone.into(),
            schedule_time: schedule_time.into(),
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            timezone: default_timezone(),
            schedule_time: default_schedule_time(),
        }
    }
}

/// 検索プロバイダから取得した候補記事。
///
/// `content_fingerprint` と `delivery_id` は重複排除ステージで付与される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

impl Document {
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            published_date: None,
            score: 0.0,
            raw_content: None,
            content_fingerprint: None,
            delivery_id: None,
        }
    }
}

/// 要約済みでレンダリング待ちの記事。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brief {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub content_fingerprint: String,
    pub delivery_id: String,
}

/// パイプラインの名前付き状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ScheduleCheck,
    DeriveQueries,
    Retrieve,
    Dedup,
    Summarize,
    Store,
    Render,
    Deliver,
    Done,
    SkippedEarly,
}

impl PipelineStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScheduleCheck => "schedule_check",
            Self::DeriveQueries => "derive_queries",
            Self::Retrieve => "retrieve",
            Self::Dedup => "dedup",
            Self::Summarize => "summarize",
            Self::Store => "store",
            Self::Render => "render",
            Self::Deliver => "deliver",
            Self::Done => "done",
            Self::SkippedEarly => "skipped_early",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 早期終了の理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotScheduled,
    NoDocuments,
    NoBriefs,
}

/// 実行の最終結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    SkippedEarly {
        after: PipelineStage,
        reason: SkipReason,
    },
    Cancelled {
        before: PipelineStage,
    },
}

/// ステージが記録する観測用メタデータ。
///
/// 各フィールドは書き込むステージが一つに決まっており、分岐判定が読むのは
/// `schedule_check_passed` のみ。未実行のステージのキーは `None` のまま残る。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_check_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries_generated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates_filtered: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_after_dedup: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries_generated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles_stored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_message_id: Option<String>,
    #[serde(default)]
    pub stages_completed: Vec<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

/// 一回の実行で各ステージに受け渡される状態。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    recipient: String,
    preferences: Preferences,
    pub(crate) queries: Vec<String>,
    pub(crate) raw_documents: Vec<Document>,
    pub(crate) deduped_documents: Vec<Document>,
    pub(crate) briefs: Vec<Brief>,
    pub(crate) rendered_message: String,
    errors: Vec<String>,
    pub(crate) metadata: RunMetadata,
}

impl PipelineState {
    pub fn new(recipient: impl Into<String>, preferences: Preferences) -> Self {
        Self {
            recipient: recipient.into(),
            preferences,
            queries: Vec::new(),
            raw_documents: Vec::new(),
            deduped_documents: Vec::new(),
            briefs: Vec::new(),
            rendered_message: String::new(),
            errors: Vec::new(),
            metadata: RunMetadata::default(),
        }
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    #[must_use]
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    #[must_use]
    pub fn raw_documents(&self) -> &[Document] {
        &self.raw_documents
    }

    #[must_use]
    pub fn deduped_documents(&self) -> &[Document] {
        &self.deduped_documents
    }

    #[must_use]
    pub fn briefs(&self) -> &[Brief] {
        &self.briefs
    }

    #[must_use]
    pub fn rendered_message(&self) -> &str {
        &self.rendered_message
    }

    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    #[must_use]
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.metadata.outcome
    }

    pub(crate) fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub(crate) fn mark_completed(&mut self, stage: PipelineStage) {
        self.metadata.stages_completed.push(stage);
    }
}
