//! ブリーフィングパイプラインのステージ定義と実行順序。
//!
//! トポロジーは固定で、3つの分岐点（予定時刻判定後・検索後・要約後）でのみ早期終了する。
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::clients::{LanguageModel, MailTransport, SearchOptions, SearchProvider, TimeSource};
use crate::observability::metrics::Metrics;
use crate::store::FingerprintStore;
use crate::util::redact::redact;
use crate::util::retry::{RetryConfig, RetryingClient};

pub mod dedup;
pub mod deliver;
pub mod persist;
pub mod query;
pub mod render;
pub mod retrieve;
pub mod schedule;
pub mod state;
pub mod summarize;
#[cfg(test)]
pub(crate) mod test_support;

use dedup::DedupStage;
use deliver::DeliveryStage;
use persist::StoreStage;
use query::QueryDerivationStage;
use render::RenderStage;
use retrieve::RetrievalStage;
use schedule::ScheduleGateStage;
use state::{PipelineStage, PipelineState, Preferences, RunOutcome, SkipReason};
use summarize::SummarizeStage;

/// 状態を受け取り、更新した状態を返す1ステージ。失敗はすべて状態の `errors` に吸収する。
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> PipelineStage;

    async fn run(&self, state: PipelineState) -> PipelineState;
}

/// パイプラインの調整可能なパラメータ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub schedule_tolerance_minutes: u32,
    pub max_queries: usize,
    pub search: SearchOptions,
    pub summary_input_chars: usize,
    pub subject: String,
    pub retry: RetryConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schedule_tolerance_minutes: 15,
            max_queries: 2,
            search: SearchOptions::default(),
            summary_input_chars: 500,
            subject: "Your Daily AI Briefing".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0} must be configured before build")]
    MissingCollaborator(&'static str),
}

struct PipelineStages {
    schedule: Arc<dyn Stage>,
    query: Arc<dyn Stage>,
    retrieve: Arc<dyn Stage>,
    dedup: Arc<dyn Stage>,
    summarize: Arc<dyn Stage>,
    store: Arc<dyn Stage>,
    render: Arc<dyn Stage>,
    deliver: Arc<dyn Stage>,
}

impl PipelineStages {
    fn ordered(&self) -> [&Arc<dyn Stage>; 8] {
        [
            &self.schedule,
            &self.query,
            &self.retrieve,
            &self.dedup,
            &self.summarize,
            &self.store,
            &self.render,
            &self.deliver,
        ]
    }
}

/// ステージ完了直後に評価する分岐。`Some` なら残りのステージを実行しない。
#[must_use]
pub fn branch_after(stage: PipelineStage, state: &PipelineState) -> Option<SkipReason> {
    match stage {
        PipelineStage::ScheduleCheck if state.metadata().schedule_check_passed == Some(false) => {
            Some(SkipReason::NotScheduled)
        }
        PipelineStage::Retrieve if state.raw_documents().is_empty() => Some(SkipReason::NoDocuments),
        PipelineStage::Summarize if state.briefs().is_empty() => Some(SkipReason::NoBriefs),
        _ => None,
    }
}

pub struct PipelineRunner {
    stages: PipelineStages,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineRunner {
    #[must_use]
    pub fn builder(settings: PipelineSettings) -> PipelineBuilder {
        PipelineBuilder::new(settings)
    }

    /// 1人分のパイプラインを最後まで（または分岐で終了するまで）実行する。
    pub async fn run(&self, recipient: &str, preferences: Preferences) -> PipelineState {
        self.run_with_cancel(recipient, preferences, &CancellationToken::new())
            .await
    }

    /// キャンセル可能な実行。キャンセルは各ステージの開始前と実行中に監視し、
    /// 実行中に中断した場合はそのステージに入る前の状態を返す。
    pub async fn run_with_cancel(
        &self,
        recipient: &str,
        preferences: Preferences,
        cancel: &CancellationToken,
    ) -> PipelineState {
        let span = info_span!("briefing_run", recipient = %redact(recipient));
        let mut state = PipelineState::new(recipient, preferences);
        state.metadata.started_at = Some(Utc::now());

        async move {
            info!("briefing pipeline started");

            for stage in self.stages.ordered() {
                let kind = stage.kind();
                if cancel.is_cancelled() {
                    return self.finish(state, RunOutcome::Cancelled { before: kind });
                }

                let snapshot = state.clone();
                let started = Instant::now();
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = stage.run(state) => Some(next),
                };
                let Some(next) = next else {
                    return self.finish(snapshot, RunOutcome::Cancelled { before: kind });
                };

                state = next;
                state.mark_completed(kind);
                if let Some(metrics) = &self.metrics {
                    metrics
                        .stage_duration
                        .with_label_values(&[kind.as_str()])
                        .observe(started.elapsed().as_secs_f64());
                }

                if let Some(reason) = branch_after(kind, &state) {
                    return self.finish(state, RunOutcome::SkippedEarly { after: kind, reason });
                }
            }

            self.finish(state, RunOutcome::Completed)
        }
        .instrument(span)
        .await
    }

    fn finish(&self, mut state: PipelineState, outcome: RunOutcome) -> PipelineState {
        state.metadata.finished_at = Some(Utc::now());
        state.metadata.outcome = Some(outcome);

        info!(
            outcome = ?outcome,
            errors = state.errors().len(),
            stages = state.metadata().stages_completed.len(),
            "briefing pipeline finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_run(&state);
        }
        state
    }
}

/// コラボレーターを差し込んで `PipelineRunner` を組み立てるビルダー。
pub struct PipelineBuilder {
    settings: PipelineSettings,
    search: Option<Arc<dyn SearchProvider>>,
    model: Option<Arc<dyn LanguageModel>>,
    transport: Option<Arc<dyn MailTransport>>,
    clock: Option<Arc<dyn TimeSource>>,
    store: Option<Arc<dyn FingerprintStore>>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            search: None,
            model: None,
            transport: None,
            clock: None,
            store: None,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    #[must_use]
    pub fn with_language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// 必須のコラボレーターが設定されていない場合は `BuildError` を返す。
    pub fn build(self) -> Result<PipelineRunner, BuildError> {
        let search = self
            .search
            .ok_or(BuildError::MissingCollaborator("search provider"))?;
        let model = self
            .model
            .ok_or(BuildError::MissingCollaborator("language model"))?;
        let transport = self
            .transport
            .ok_or(BuildError::MissingCollaborator("mail transport"))?;
        let clock = self
            .clock
            .ok_or(BuildError::MissingCollaborator("time source"))?;
        let store = self
            .store
            .ok_or(BuildError::MissingCollaborator("fingerprint store"))?;

        let settings = self.settings;
        let retry = RetryingClient::new(settings.retry);

        let stages = PipelineStages {
            schedule: Arc::new(ScheduleGateStage::new(
                clock,
                settings.schedule_tolerance_minutes,
            )),
            query: Arc::new(QueryDerivationStage::new(
                Arc::clone(&model),
                retry,
                settings.max_queries,
            )),
            retrieve: Arc::new(RetrievalStage::new(search, settings.search, retry)),
            dedup: Arc::new(DedupStage::new(Arc::clone(&store))),
            summarize: Arc::new(SummarizeStage::new(
                Arc::clone(&model),
                retry,
                settings.summary_input_chars,
            )),
            store: Arc::new(StoreStage::new(Arc::clone(&store))),
            render: Arc::new(RenderStage::new(model, retry)),
            deliver: Arc::new(DeliveryStage::new(transport, store, settings.subject)),
        };

        Ok(PipelineRunner {
            stages,
            metrics: self.metrics,
        })
    }
}
