use std::time::Duration;

use order_book_engine::config::Config;
use order_book_engine::state::AppState;
use order_book_engine::utils::shutdown_token;
use order_book_engine::{api, snapshot};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env();
    let port = config.port;
    let snapshot_interval = config.snapshot_interval_sec;
    let state = AppState::new(config).await?;

    if snapshot_interval > 0 {
        let engine = state.engine.clone();
        tokio::spawn(snapshot::run(
            engine,
            Duration::from_secs(snapshot_interval),
            10,
        ));
    }

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(%port, "matching engine listening");

    let shutdown = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
