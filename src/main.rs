use std::net::SocketAddr;

use pet_fitting::{
    routes::{app, AppState},
    Config, FittingService,
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    let service = FittingService::from_config(&config);
    let offered = service.offered_engines();
    if offered.is_empty() {
        anyhow::bail!("no engine is configured: set GEMINI_API_KEY + FAL_KEY, FAL_KEY, or ARK_API_KEY");
    }
    for info in &offered {
        tracing::info!("🧩 Engine {} ready ({})", info.engine, info.strategy.as_str());
    }
    tracing::info!("⏱️ Stage timeout: {}s", config.stage_timeout.as_secs());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("👋 Shutting down");
}
