use std::sync::Arc;

use asset_extractor::{api, config::Config, extract::chromium, extract::AssetExtractor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let renderer = chromium::discover(&config);
    let state = Arc::new(AssetExtractor::new(Arc::clone(&config), renderer));

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        max_browsers = config.max_browsers,
        "listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
