use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scanmint::{
    config::AppConfig,
    publish::{AssetPublisher, ProfileDirectory},
    remote::{GatewayClient, GatewayConfig, HttpSigner, RemoteContext, Signer},
    web::{AppState, build_router},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SIGNER_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOG_FILTER: &str = "scanmint=debug,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load application configuration")?;

    let client = GatewayClient::new(GatewayConfig::new(&config.mu_url, &config.cu_url))
        .context("failed to build gateway client")?;
    let signer = HttpSigner::connect(&config.signer_url, SIGNER_TIMEOUT)
        .await
        .with_context(|| format!("failed to reach signer at {}", config.signer_url))?;
    info!(address = signer.address(), "signer connected");

    let ctx = RemoteContext::new(Arc::new(client), Arc::new(signer));
    let settings = Arc::new(config.publish_settings().await?);
    let profiles = ProfileDirectory::new(ctx.clone(), config.profile_registry.clone());
    let publisher = AssetPublisher::new(ctx, settings, profiles);

    let app = build_router(AppState::new(publisher));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        address = %addr,
        collection = config.collection.as_ref().map(|id| id.as_str()).unwrap_or("-"),
        "scanmint server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let signal = wait_for_signal().await;
    info!(signal, "shutting down, draining in-flight uploads");
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        signal = ctrl_c() => signal,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            error!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending().await
        }
    }
}
