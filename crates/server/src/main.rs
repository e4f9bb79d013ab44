//! Process entrypoint
//!
//! Loads settings, wires the shared collaborators, and serves the webhook
//! and media stream endpoints until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use frontdesk_llm::{HttpExtractor, HttpExtractorConfig};
use frontdesk_server::{
    create_router, metrics, AppState, CachedOrgProvider, ChannelEventSink, InMemoryAppointments,
    StaticOrgProvider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("FRONTDESK_CONFIG").ok();
    let settings = frontdesk_config::load_settings(config_path.as_deref())
        .context("failed to load settings")?;

    init_tracing(&settings.log_level);
    metrics::init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = settings.server.port,
        "starting"
    );

    // Organization contexts: static TOML directory behind the shared
    // read-through cache.
    let static_provider: Arc<dyn frontdesk_core::OrgContextProvider> =
        match settings.orgs_path.as_deref() {
            Some(path) => Arc::new(
                StaticOrgProvider::load(path)
                    .with_context(|| format!("loading organizations from {path}"))?
                    .with_default_org(settings.default_org_id.clone()),
            ),
            None => {
                tracing::warn!("no orgs_path configured, every call gets the default context");
                Arc::new(StaticOrgProvider::empty())
            }
        };
    let org_provider = Arc::new(CachedOrgProvider::new(static_provider));

    let extractor = Arc::new(
        HttpExtractor::new(HttpExtractorConfig {
            endpoint: settings.llm.endpoint.clone(),
            api_key: settings.llm.api_key.clone(),
            model: settings.llm.model.clone(),
            timeout: std::time::Duration::from_millis(settings.llm.timeout_ms),
            max_retries: settings.llm.max_retries,
            retry_backoff: std::time::Duration::from_millis(settings.llm.retry_backoff_ms),
            ..Default::default()
        })
        .context("building extractor")?,
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let (events, sink_task) =
        ChannelEventSink::start(PathBuf::from("events.jsonl"), shutdown.clone());

    let appointments = Arc::new(InMemoryAppointments::new());

    // Sessions derive their cancellation from the process token.
    let state = AppState::new(
        settings.clone(),
        org_provider,
        Arc::new(events),
        appointments,
        extractor,
        shutdown.clone(),
    );

    let sweeper = state.calls.spawn_sweeper(shutdown.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, public_host = %settings.server.public_host, "listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    // Teardown: stop the sweeper and flush the sink.
    shutdown.cancel();
    let _ = sweeper.await;
    let _ = sink_task.await;

    tracing::info!("stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
