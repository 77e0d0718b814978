use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "briefing-worker";

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `OTEL_EXPORTER_OTLP_ENDPOINT` が設定されていればOTLPでもスパンを送信する。
/// エクスポーターの構築に失敗した場合はJSONログのみで続行する。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        let (otel_layer, exporter_error) = match endpoint.as_deref().map(init_tracer) {
            Some(Ok(tracer)) => (Some(tracing_opentelemetry::layer().with_tracer(tracer)), None),
            Some(Err(err)) => (None, Some(err)),
            None => (None, None),
        };
        let otel_enabled = otel_layer.is_some();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::msg(e.to_string()))?;

        match exporter_error {
            Some(err) => warn!(
                otel_enabled,
                error = %err,
                "OTLP exporter unavailable, logging to stdout only"
            ),
            None => info!(otel_enabled, "tracing initialized"),
        }

        Ok::<(), Error>(())
    })?;
    Ok(())
}

/// サンプリング比率は `OTEL_SAMPLING_RATIO`（既定 1.0）。
fn init_tracer(endpoint: &str) -> Result<SdkTracer> {
    let sampling_ratio = std::env::var("OTEL_SAMPLING_RATIO")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider.clone());
    let _ = TRACER_PROVIDER.set(tracer_provider);

    Ok(tracer)
}

/// 未送信のスパンをフラッシュしてエクスポーターを停止する。OTLP無効時は何もしない。
pub fn shutdown() {
    if let Some(Err(err)) = TRACER_PROVIDER.get().map(SdkTracerProvider::shutdown) {
        eprintln!("failed to shut down tracer provider: {err}");
    }
}
