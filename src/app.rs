use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    api,
    clients::{
        GroqClient, GroqConfig, LanguageModel, MailTransport, OutboxTransport, SearchProvider,
        SmtpTransport, SystemClock, TavilyClient, TavilyConfig, TimeSource,
    },
    config::Config,
    observability::Telemetry,
    pipeline::PipelineRunner,
    scheduler::Scheduler,
    store::{FingerprintStore, InMemoryFingerprintStore, PgFingerprintStore},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    scheduler: Scheduler,
    database: Option<PgFingerprintStore>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.registry.scheduler
    }

    pub(crate) fn database(&self) -> Option<&PgFingerprintStore> {
        self.registry.database.as_ref()
    }
}

impl ComponentRegistry {
    /// 設定から全コラボレーターを組み立て、共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化、HTTP クライアント構築、データベース接続のいずれかが失敗した場合はエラーを返す。
    pub async fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new()?;
        Self::build_with_telemetry(config, telemetry).await
    }

    /// # Errors
    /// HTTP クライアント構築やデータベース接続が失敗した場合はエラーを返す。
    pub async fn build_with_telemetry(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);

        let search: Arc<dyn SearchProvider> = Arc::new(TavilyClient::new(TavilyConfig {
            base_url: config.tavily_base_url().to_string(),
            api_key: config.tavily_api_key().to_string(),
            timeout: config.http_timeout(),
        })?);
        let model: Arc<dyn LanguageModel> = Arc::new(GroqClient::new(GroqConfig {
            base_url: config.groq_base_url().to_string(),
            api_key: config.groq_api_key().to_string(),
            model: config.groq_model().to_string(),
            temperature: config.llm_temperature(),
            timeout: config.http_timeout(),
        })?);
        let transport: Arc<dyn MailTransport> = match config.smtp() {
            Some(smtp) => {
                info!(server = %smtp.server, port = smtp.port, "using smtp mail transport");
                Arc::new(
                    SmtpTransport::new(smtp.clone(), config.from_address())
                        .context("failed to build smtp transport")?,
                )
            }
            None => {
                info!(outbox = %config.outbox_dir().display(), "using outbox mail transport");
                Arc::new(OutboxTransport::new(
                    config.outbox_dir().clone(),
                    config.from_address(),
                ))
            }
        };
        let clock: Arc<dyn TimeSource> = Arc::new(
            SystemClock::new(config.fallback_timezone())
                .context("failed to build system clock")?,
        );

        let (store, database): (Arc<dyn FingerprintStore>, Option<PgFingerprintStore>) =
            match config.db_dsn() {
                Some(dsn) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(config.db_max_connections())
                        .connect(dsn)
                        .await
                        .context("failed to connect to briefing database")?;
                    let pg = PgFingerprintStore::new(pool);
                    pg.ensure_schema()
                        .await
                        .context("failed to ensure fingerprint store schema")?;
                    info!("using postgres fingerprint store");
                    let store: Arc<dyn FingerprintStore> = Arc::new(pg.clone());
                    (store, Some(pg))
                }
                None => {
                    info!("using in-memory fingerprint store");
                    let store: Arc<dyn FingerprintStore> = Arc::new(InMemoryFingerprintStore::new());
                    (store, None)
                }
            };

        let pipeline = PipelineRunner::builder(config.pipeline_settings())
            .with_search(search)
            .with_language_model(model)
            .with_mail_transport(transport)
            .with_time_source(Arc::clone(&clock))
            .with_store(store)
            .with_metrics(telemetry.metrics())
            .build()
            .context("failed to assemble briefing pipeline")?;

        let scheduler = Scheduler::new(
            Arc::new(pipeline),
            clock,
            config.subscribers_path().cloned(),
        );

        Ok(Self::from_parts(config, telemetry, scheduler, database))
    }

    #[must_use]
    pub fn from_parts(
        config: Arc<Config>,
        telemetry: Telemetry,
        scheduler: Scheduler,
        database: Option<PgFingerprintStore>,
    ) -> Self {
        Self {
            config,
            telemetry,
            scheduler,
            database,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
