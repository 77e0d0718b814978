use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ledger::SendLedger;
use super::roster::{RosterError, Subscriber, load_roster};
use crate::clients::TimeSource;
use crate::pipeline::PipelineRunner;
use crate::pipeline::state::{PipelineState, Preferences, RunOutcome};
use crate::util::redact::redact;

/// 1回のティックの集計。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub subscribers: usize,
    pub runs: usize,
    pub delivered: usize,
    pub already_sent_today: usize,
    pub cancelled: bool,
}

/// 購読者一覧に対してパイプラインを順に実行するスケジューラ。
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<PipelineRunner>,
    clock: Arc<dyn TimeSource>,
    ledger: Arc<SendLedger>,
    roster_path: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<PipelineRunner>,
        clock: Arc<dyn TimeSource>,
        roster_path: Option<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            clock,
            ledger: Arc::new(SendLedger::new()),
            roster_path,
        }
    }

    #[must_use]
    pub fn roster_path(&self) -> Option<&PathBuf> {
        self.roster_path.as_ref()
    }

    /// 手動実行。台帳は参照も更新もしない。
    pub async fn run_manual(&self, recipient: &str, preferences: Preferences) -> PipelineState {
        info!(recipient = %redact(recipient), "running manual briefing");
        self.pipeline.run(recipient, preferences).await
    }

    /// 1人分を実行する。同じ現地日付に配信済みなら `None`。
    pub async fn run_subscriber(
        &self,
        subscriber: &Subscriber,
        cancel: &CancellationToken,
    ) -> Option<PipelineState> {
        let local_date = self
            .clock
            .now_in_zone(&subscriber.preferences.timezone)
            .now
            .date_naive();
        if self.ledger.already_sent(&subscriber.recipient, local_date) {
            debug!(
                recipient = %redact(&subscriber.recipient),
                %local_date,
                "briefing already sent today"
            );
            return None;
        }

        let state = self
            .pipeline
            .run_with_cancel(&subscriber.recipient, subscriber.preferences.clone(), cancel)
            .await;

        if state.metadata().email_sent == Some(true) {
            self.ledger.record(&subscriber.recipient, local_date);
        }
        Some(state)
    }

    /// 購読者一覧を読み込み、全員分を順に実行する。
    ///
    /// # Errors
    /// 購読者一覧の読み込みに失敗した場合はエラーを返す。
    pub async fn run_tick(&self, cancel: &CancellationToken) -> Result<TickSummary, RosterError> {
        let Some(path) = &self.roster_path else {
            debug!("no subscriber roster configured");
            return Ok(TickSummary::default());
        };
        let subscribers = load_roster(path).await?;
        Ok(self.run_subscribers(&subscribers, cancel).await)
    }

    pub async fn run_subscribers(
        &self,
        subscribers: &[Subscriber],
        cancel: &CancellationToken,
    ) -> TickSummary {
        let mut summary = TickSummary {
            subscribers: subscribers.len(),
            ..TickSummary::default()
        };

        for subscriber in subscribers {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let Some(state) = self.run_subscriber(subscriber, cancel).await else {
                summary.already_sent_today += 1;
                continue;
            };
            summary.runs += 1;
            if state.metadata().email_sent == Some(true) {
                summary.delivered += 1;
            }
            if matches!(state.outcome(), Some(RunOutcome::Cancelled { .. })) {
                warn!(recipient = %redact(&subscriber.recipient), "briefing run cancelled");
                summary.cancelled = true;
                break;
            }
        }

        summary
    }
}
