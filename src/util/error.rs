/// 外部コラボレーター呼び出しのエラー分類。
///
/// パイプラインはこれらのエラーを `errors` に吸収し、実行自体は中断しない。
use reqwest::StatusCode;
use thiserror::Error;

/// 検索プロバイダ／言語モデルプロバイダの失敗。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// 接続失敗・タイムアウトなどの一時的なエラー
    #[error("{provider} transport failure: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    /// 非2xxのHTTPステータス
    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    /// 応答は得られたが利用できない内容だった
    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            provider,
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// reqwestのエラーを分類して変換する。
    pub(crate) fn from_reqwest(provider: &'static str, error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Status {
                provider,
                status: status.as_u16(),
                body: error.to_string(),
            };
        }
        if error.is_decode() {
            return Self::invalid_response(provider, error.to_string());
        }
        Self::transport(provider, error.to_string())
    }

    /// 再試行する価値のあるエラーかどうかを判定する。
    ///
    /// - ネットワークエラー・タイムアウト
    /// - 5xxサーバーエラー
    /// - 429 Too Many Requests
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => StatusCode::from_u16(*status).is_ok_and(|status| {
                status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
            }),
            Self::InvalidResponse { .. } => false,
        }
    }
}

/// メール送信の失敗。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mail transport rejected message for {recipient}: {message}")]
    Rejected { recipient: String, message: String },
    #[error("mail transport I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sender address '{address}': {message}")]
    InvalidAddress { address: String, message: String },
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// フィンガープリントストアの失敗。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fingerprint store backend failure: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("fingerprint store lock poisoned")]
    Poisoned,
}
