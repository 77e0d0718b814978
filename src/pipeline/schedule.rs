//! 受信者のタイムゾーンで配信予定時刻に達しているかを判定するゲート。
//!
//! 内部エラー（未知のゾーン、不正な予定時刻）では配信を止めない。
//! エラーを記録したうえで判定結果を `true` に倒す。
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use thiserror::Error;
use tracing::{debug, warn};

use super::Stage;
use super::state::{PipelineStage, PipelineState};
use crate::clients::TimeSource;

/// 予定時刻文字列の検証エラー。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule time '{0}' is not in HH:MM format")]
    Malformed(String),
    #[error("schedule time '{value}' has hour {hour} outside 0-23")]
    HourOutOfRange { value: String, hour: u32 },
    #[error("schedule time '{value}' has minute {minute} outside 0-59")]
    MinuteOutOfRange { value: String, minute: u32 },
}

/// "HH:MM"（24時間表記、時は1桁も可）を解釈する。
///
/// # Errors
/// 区切りがない、数値でない、範囲外の場合は `ScheduleError` を返す。
pub fn parse_schedule_time(value: &str) -> Result<NaiveTime, ScheduleError> {
    let malformed = || ScheduleError::Malformed(value.to_string());

    let (hour, minute) = value.trim().split_once(':').ok_or_else(malformed)?;
    if hour.is_empty() || minute.len() != 2 {
        return Err(malformed());
    }
    let hour: u32 = hour.parse().map_err(|_| malformed())?;
    let minute: u32 = minute.parse().map_err(|_| malformed())?;

    if hour > 23 {
        return Err(ScheduleError::HourOutOfRange {
            value: value.to_string(),
            hour,
        });
    }
    if minute > 59 {
        return Err(ScheduleError::MinuteOutOfRange {
            value: value.to_string(),
            minute,
        });
    }

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(malformed)
}

/// 同じ日の予定時刻との差が許容範囲内か。日付をまたぐ比較はしない。
#[must_use]
pub fn within_tolerance(now: NaiveTime, scheduled: NaiveTime, tolerance_minutes: u32) -> bool {
    let now_secs = i64::from(now.num_seconds_from_midnight());
    let scheduled_secs = i64::from(scheduled.num_seconds_from_midnight());
    (now_secs - scheduled_secs).abs() <= i64::from(tolerance_minutes) * 60
}

pub struct ScheduleGateStage {
    clock: Arc<dyn TimeSource>,
    tolerance_minutes: u32,
}

impl ScheduleGateStage {
    pub fn new(clock: Arc<dyn TimeSource>, tolerance_minutes: u32) -> Self {
        Self {
            clock,
            tolerance_minutes,
        }
    }
}

#[async_trait]
impl Stage for ScheduleGateStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::ScheduleCheck
    }

    async fn run(&self, mut state: PipelineState) -> PipelineState {
        let timezone = state.preferences().timezone.clone();
        let schedule_time = state.preferences().schedule_time.clone();

        let zoned = self.clock.now_in_zone(&timezone);
        let mut passed = true;

        if zoned.fell_back {
            warn!(
                timezone = %timezone,
                fallback = %zoned.zone,
                "schedule check could not resolve time zone"
            );
            state.push_error(format!(
                "Schedule check error: unknown time zone '{timezone}', used {}",
                zoned.zone
            ));
        }

        match parse_schedule_time(&schedule_time) {
            Ok(scheduled) if !zoned.fell_back => {
                passed = within_tolerance(zoned.now.time(), scheduled, self.tolerance_minutes);
                debug!(
                    timezone = %zoned.zone,
                    now = %zoned.now.format("%H:%M:%S"),
                    scheduled = %scheduled.format("%H:%M"),
                    passed,
                    "schedule check evaluated"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "schedule check could not parse schedule time");
                state.push_error(format!("Schedule check error: {err}"));
            }
        }

        state.metadata.schedule_check_passed = Some(passed);
        state
    }
}
