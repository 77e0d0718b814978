/// Prometheusメトリクス定義。
use std::sync::Arc;

use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, Registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
};

use crate::pipeline::state::{PipelineState, RunOutcome};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub runs: IntCounterVec,
    pub documents_found: IntCounter,
    pub duplicates_filtered: IntCounter,
    pub summaries_generated: IntCounter,
    pub emails_sent: IntCounter,
    pub emails_failed: IntCounter,
    pub run_errors: IntCounter,

    // ヒストグラム
    pub stage_duration: HistogramVec,
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

impl Metrics {
    /// # Errors
    /// 同名のメトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            runs: register_int_counter_vec_with_registry!(
                "briefing_runs_total",
                "Pipeline runs by terminal outcome",
                &["outcome"],
                registry
            )?,
            documents_found: register_int_counter_with_registry!(
                "briefing_documents_found_total",
                "Documents returned by the search provider",
                registry
            )?,
            duplicates_filtered: register_int_counter_with_registry!(
                "briefing_duplicates_filtered_total",
                "Documents rejected by global or per-recipient dedup",
                registry
            )?,
            summaries_generated: register_int_counter_with_registry!(
                "briefing_summaries_generated_total",
                "Briefs produced by the summarization stage",
                registry
            )?,
            emails_sent: register_int_counter_with_registry!(
                "briefing_emails_sent_total",
                "Briefings accepted by the mail transport",
                registry
            )?,
            emails_failed: register_int_counter_with_registry!(
                "briefing_emails_failed_total",
                "Briefings rejected by the mail transport",
                registry
            )?,
            run_errors: register_int_counter_with_registry!(
                "briefing_run_errors_total",
                "Error entries accumulated across pipeline runs",
                registry
            )?,
            stage_duration: register_histogram_vec_with_registry!(
                "briefing_stage_duration_seconds",
                "Wall-clock duration of each pipeline stage",
                &["stage"],
                registry
            )?,
        })
    }

    /// 終端状態からカウンターを更新する。
    pub fn record_run(&self, state: &PipelineState) {
        let outcome = match state.outcome() {
            Some(RunOutcome::Completed) => "completed",
            Some(RunOutcome::SkippedEarly { .. }) => "skipped_early",
            Some(RunOutcome::Cancelled { .. }) => "cancelled",
            None => "unknown",
        };
        self.runs.with_label_values(&[outcome]).inc();

        let metadata = state.metadata();
        self.documents_found
            .inc_by(as_u64(metadata.documents_found.unwrap_or(0)));
        self.duplicates_filtered
            .inc_by(as_u64(metadata.duplicates_filtered.unwrap_or(0)));
        self.summaries_generated
            .inc_by(as_u64(metadata.summaries_generated.unwrap_or(0)));
        match metadata.email_sent {
            Some(true) => self.emails_sent.inc(),
            Some(false) => self.emails_failed.inc(),
            None => {}
        }
        self.run_errors.inc_by(as_u64(state.errors().len()));
    }
}
