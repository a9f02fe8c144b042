//! Tessera upload server entry point.

mod config;

use tessera_upload_server::{AppState, ServerConfig, UploadServer};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, RegistryBackend};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Tessera server");

    let config = Config::load()?;
    tracing::info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        registry = ?config.registry,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::open(
        &config.data_dir,
        config.registry == RegistryBackend::Sqlite,
        &config.public_base_url,
        config.cleanup_chunks_after_merge,
    )?;

    let server = UploadServer::bind(
        ServerConfig {
            bind: config.bind_addr()?,
            max_chunk_bytes: config.max_chunk_bytes,
        },
        state,
    )
    .await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}
