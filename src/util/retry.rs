/// 指数バックオフ付き再試行ロジック。
///
/// 試行回数のみを制限し、経過時間の上限は各コラボレーター側のタイムアウトに委ねる。
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use super::error::ProviderError;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub max_attempts: usize,
    /// 最初の再試行前の待機時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 待機なしで再試行する設定（テスト用）。
    #[must_use]
    pub const fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, 0, 0)
    }

    /// 指定された試行回数に対する遅延時間を計算する。
    ///
    /// `attempt` は失敗済みの試行数（1から開始）。base * 2^(attempt-1) を上限でキャップする。
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
        let exponential_delay = self.base_delay_ms.saturating_mul(1_u64 << shift);

        Duration::from_millis(exponential_delay.min(self.max_delay_ms))
    }

    /// この試行回数が再試行可能かどうかを判定する。
    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// 単一の外部呼び出しを有界の指数バックオフで再試行するラッパー。
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryingClient {
    config: RetryConfig,
}

impl RetryingClient {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> RetryConfig {
        self.config
    }

    /// `operation` を実行し、再試行可能なエラーであれば設定回数まで再試行する。
    ///
    /// 戻り値のタプルの2要素目は実際に行った試行回数。
    ///
    /// # Errors
    /// 試行回数を使い切った場合、または再試行不可能なエラーの場合は最後のエラーを返す。
    pub async fn call<T, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> (Result<T, ProviderError>, usize)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(label, attempt, "call succeeded after retry");
                    }
                    return (Ok(value), attempt + 1);
                }
                Err(err) => {
                    attempt += 1;

                    if !err.is_retryable() {
                        warn!(label, error = %err, "error is not retryable");
                        return (Err(err), attempt);
                    }

                    if !self.config.can_retry(attempt) {
                        warn!(
                            label,
                            attempt,
                            max_attempts = self.config.max_attempts,
                            error = %err,
                            "call failed after all retries"
                        );
                        return (Err(err), attempt);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        label,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "call failed, retrying after delay"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
