use std::{env, net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::clients::{SearchDepth, SearchOptions, SmtpConfig};
use crate::pipeline::PipelineSettings;
use crate::util::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    tavily_api_key: String,
    tavily_base_url: String,
    groq_api_key: String,
    groq_base_url: String,
    groq_model: String,
    llm_temperature: f32,
    from_address: String,
    subject: String,
    outbox_dir: PathBuf,
    smtp: Option<SmtpConfig>,
    subscribers_path: Option<PathBuf>,
    tick_interval: Duration,
    schedule_tolerance_minutes: u32,
    fallback_timezone: String,
    max_queries: NonZeroUsize,
    max_results_per_query: NonZeroUsize,
    summary_input_chars: NonZeroUsize,
    http_max_retries: NonZeroUsize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    http_timeout: Duration,
    db_dsn: Option<String>,
    db_max_connections: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からワーカーの設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `TAVILY_API_KEY` / `GROQ_API_KEY` が未設定、もしくは各種値のパースに失敗した場合は
    /// [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let tavily_api_key = required_secret("TAVILY_API_KEY")?;
        let groq_api_key = required_secret("GROQ_API_KEY")?;

        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 1000)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 30_000)?;
        if http_backoff_cap_ms < http_backoff_base_ms {
            return Err(ConfigError::Invalid {
                name: "HTTP_BACKOFF_CAP_MS",
                source: anyhow::anyhow!("must not be smaller than HTTP_BACKOFF_BASE_MS"),
            });
        }

        let tick_interval = parse_duration_secs("BRIEFING_TICK_INTERVAL_SECS", 600)?;
        if tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "BRIEFING_TICK_INTERVAL_SECS",
                source: anyhow::anyhow!("must be greater than zero"),
            });
        }

        let http_timeout = parse_duration_ms("HTTP_TIMEOUT_MS", 30_000)?;
        let smtp = if parse_bool("SMTP_ENABLED", false)? {
            Some(smtp_config(http_timeout)?)
        } else {
            None
        };

        Ok(Self {
            http_bind: parse_socket_addr("BRIEFING_HTTP_BIND", "0.0.0.0:9010")?,
            tavily_api_key,
            tavily_base_url: env_or("TAVILY_BASE_URL", "https://api.tavily.com/"),
            groq_api_key,
            groq_base_url: env_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1/"),
            groq_model: env_or("GROQ_MODEL", "llama-3.1-70b-versatile"),
            llm_temperature: parse_f32("LLM_TEMPERATURE", 0.7)?,
            from_address: env_or("BRIEFING_FROM_ADDRESS", "noreply@example.com"),
            subject: env_or("BRIEFING_SUBJECT", "Your Daily AI Briefing"),
            outbox_dir: PathBuf::from(env_or("BRIEFING_OUTBOX_DIR", "temp/emails")),
            smtp,
            subscribers_path: optional("BRIEFING_SUBSCRIBERS_PATH").map(PathBuf::from),
            tick_interval,
            schedule_tolerance_minutes: parse_u32("BRIEFING_SCHEDULE_TOLERANCE_MINUTES", 15)?,
            fallback_timezone: parse_timezone("BRIEFING_FALLBACK_TIMEZONE", "Asia/Kolkata")?,
            max_queries: parse_non_zero_usize("BRIEFING_MAX_QUERIES", 2)?,
            max_results_per_query: parse_non_zero_usize("BRIEFING_MAX_RESULTS_PER_QUERY", 5)?,
            summary_input_chars: parse_non_zero_usize("BRIEFING_SUMMARY_INPUT_CHARS", 500)?,
            http_max_retries: parse_non_zero_usize("HTTP_MAX_RETRIES", 3)?,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            http_timeout,
            db_dsn: optional("BRIEFING_DB_DSN"),
            db_max_connections: parse_u32("BRIEFING_DB_MAX_CONNECTIONS", 10)?,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn tavily_api_key(&self) -> &str {
        &self.tavily_api_key
    }

    #[must_use]
    pub fn tavily_base_url(&self) -> &str {
        &self.tavily_base_url
    }

    #[must_use]
    pub fn groq_api_key(&self) -> &str {
        &self.groq_api_key
    }

    #[must_use]
    pub fn groq_base_url(&self) -> &str {
        &self.groq_base_url
    }

    #[must_use]
    pub fn groq_model(&self) -> &str {
        &self.groq_model
    }

    #[must_use]
    pub fn llm_temperature(&self) -> f32 {
        self.llm_temperature
    }

    #[must_use]
    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn outbox_dir(&self) -> &PathBuf {
        &self.outbox_dir
    }

    /// `SMTP_ENABLED=true` のときだけ `Some`。`None` ならアウトボックスに書き出す。
    #[must_use]
    pub fn smtp(&self) -> Option<&SmtpConfig> {
        self.smtp.as_ref()
    }

    #[must_use]
    pub fn subscribers_path(&self) -> Option<&PathBuf> {
        self.subscribers_path.as_ref()
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub fn schedule_tolerance_minutes(&self) -> u32 {
        self.schedule_tolerance_minutes
    }

    #[must_use]
    pub fn fallback_timezone(&self) -> &str {
        &self.fallback_timezone
    }

    #[must_use]
    pub fn max_queries(&self) -> NonZeroUsize {
        self.max_queries
    }

    #[must_use]
    pub fn max_results_per_query(&self) -> NonZeroUsize {
        self.max_results_per_query
    }

    #[must_use]
    pub fn summary_input_chars(&self) -> NonZeroUsize {
        self.summary_input_chars
    }

    #[must_use]
    pub fn http_max_retries(&self) -> NonZeroUsize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    #[must_use]
    pub fn db_dsn(&self) -> Option<&str> {
        self.db_dsn.as_deref()
    }

    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.http_max_retries.get(),
            self.http_backoff_base_ms,
            self.http_backoff_cap_ms,
        )
    }

    /// パイプラインに渡すパラメータ一式。
    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            schedule_tolerance_minutes: self.schedule_tolerance_minutes,
            max_queries: self.max_queries.get(),
            search: SearchOptions {
                max_results: self.max_results_per_query.get(),
                depth: SearchDepth::Advanced,
                include_raw_content: true,
            },
            summary_input_chars: self.summary_input_chars.get(),
            subject: self.subject.clone(),
            retry: self.retry_config(),
        }
    }
}

fn required_secret(name: &'static str) -> Result<String, ConfigError> {
    let value = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(value)
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_or(name: &'static str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env_or(name, default);

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env_or(name, &default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn smtp_config(timeout: Duration) -> Result<SmtpConfig, ConfigError> {
    let username = optional("SMTP_USERNAME");
    let password = optional("SMTP_PASSWORD");
    if username.is_some() != password.is_some() {
        return Err(ConfigError::Invalid {
            name: "SMTP_PASSWORD",
            source: anyhow::anyhow!("SMTP_USERNAME and SMTP_PASSWORD must be set together"),
        });
    }

    Ok(SmtpConfig {
        server: env_or("SMTP_SERVER", "smtp.gmail.com"),
        port: parse_u16("SMTP_PORT", 587)?,
        username,
        password,
        starttls: parse_bool("SMTP_STARTTLS", true)?,
        timeout,
    })
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env_or(name, &default.to_string());
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_u16(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    let raw = env_or(name, &default.to_string());
    raw.parse::<u16>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env_or(name, &default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env_or(name, &default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f32(name: &'static str, default: f32) -> Result<f32, ConfigError> {
    let raw = env_or(name, &default.to_string());
    raw.parse::<f32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_timezone(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let raw = env_or(name, default);
    raw.parse::<chrono_tz::Tz>()
        .map(|tz| tz.name().to_string())
        .map_err(|error| ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("unknown time zone '{raw}': {error}"),
        })
}
