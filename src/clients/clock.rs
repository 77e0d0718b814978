use std::str::FromStr;

use chrono::Utc;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

use super::{TimeSource, ZonedNow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("invalid fallback time zone '{zone}': {message}")]
    UnknownFallbackZone { zone: String, message: String },
}

/// IANAゾーン名をchrono-tzで解決するシステム時計。
///
/// 解決できないゾーン名はフォールバックゾーン（既定 `Asia/Kolkata`）で応答する。
#[derive(Debug, Clone)]
pub struct SystemClock {
    fallback: Tz,
}

impl SystemClock {
    pub const DEFAULT_FALLBACK_ZONE: &'static str = "Asia/Kolkata";

    /// # Errors
    /// フォールバックゾーン自体が解決できない場合はエラーを返す。
    pub fn new(fallback_zone: &str) -> Result<Self, ClockError> {
        let fallback =
            Tz::from_str(fallback_zone).map_err(|err| ClockError::UnknownFallbackZone {
                zone: fallback_zone.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { fallback })
    }

    #[must_use]
    pub fn fallback_zone(&self) -> &'static str {
        self.fallback.name()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            fallback: chrono_tz::Asia::Kolkata,
        }
    }
}

impl TimeSource for SystemClock {
    fn now_in_zone(&self, zone: &str) -> ZonedNow {
        let now = Utc::now();
        match Tz::from_str(zone) {
            Ok(tz) => ZonedNow {
                now: now.with_timezone(&tz).fixed_offset(),
                zone: tz.name().to_string(),
                fell_back: false,
            },
            Err(_) => {
                warn!(
                    zone,
                    fallback = self.fallback.name(),
                    "unknown time zone, using fallback"
                );
                ZonedNow {
                    now: now.with_timezone(&self.fallback).fixed_offset(),
                    zone: self.fallback.name().to_string(),
                    fell_back: true,
                }
            }
        }
    }
}
