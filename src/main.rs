use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use briefing_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
    observability,
    scheduler::spawn_briefing_daemon,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let bind_addr = config.http_bind();
    let tick_interval = config.tick_interval();
    let registry = ComponentRegistry::build(config)
        .await
        .context("failed to build component registry")?;

    let shutdown = CancellationToken::new();
    let daemon = if registry.scheduler().roster_path().is_some() {
        Some(spawn_briefing_daemon(
            registry.scheduler().clone(),
            tick_interval,
            shutdown.clone(),
        ))
    } else {
        warn!("skipping briefing daemon because BRIEFING_SUBSCRIBERS_PATH is not set");
        None
    };
    let router = build_router(registry);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;

    info!(%bind_addr, "listening");

    let signal_token = shutdown.clone();
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(error) => {
                warn!(%error, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
        signal_token.cancel();
    });

    if let Err(error) = serve.await {
        warn!(error = %error, "server exited with error");
    }

    shutdown.cancel();
    let daemon_result = match daemon {
        Some(handle) => handle.await,
        None => Ok(()),
    };
    if let Err(error) = daemon_result {
        warn!(%error, "briefing daemon terminated abnormally");
    }

    observability::shutdown_tracing();

    Ok(())
}
