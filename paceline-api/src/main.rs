//! paceline-api entry point

use anyhow::Context;
use paceline_api::{build_router, AppState};
use paceline_common::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("paceline-api v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        bind = %config.bind,
        database = %config.database_path,
        window_days = config.window_days,
        detail_workers = config.detail_max_concurrency,
        "Configuration loaded"
    );

    let db = paceline_api::store::init_database_pool(std::path::Path::new(&config.database_path))
        .await
        .context("Failed to initialize database")?;

    let bind = config.bind.clone();
    let state = AppState::new(db, config).context("Failed to build application state")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("Listening on {}", bind);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
