#![forbid(unsafe_code)]

use std::sync::Arc;

use facegate_adapter::{router, AdapterConfig, AdapterRuntime};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AdapterConfig::from_env()?;
    let runtime = Arc::new(AdapterRuntime::new(&config)?);

    // Load the registry before the first request; a failure here leaves
    // /healthz unhealthy until the worker's next pass succeeds.
    match runtime.engine().refresh_registry() {
        Ok(generation) => tracing::info!(generation, "registry ready"),
        Err(e) => tracing::warn!(error = %e, "initial registry load failed"),
    }
    let _workers = runtime.spawn_background_workers();

    let app = router(runtime.clone());
    tracing::info!(
        addr = %config.bind,
        device_channel = runtime.engine().devices().channel_name(),
        refresh_interval_ms = config.engine.registry_refresh_interval_ms,
        "facegate_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("facegate_adapter_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
