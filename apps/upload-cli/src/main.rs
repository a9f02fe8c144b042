//! tessera-upload: send a file to a Tessera server, resuming where a
//! previous attempt stopped.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tessera_transfer::DEFAULT_CHUNK_SIZE;
use tessera_uploader::{
    DEFAULT_CONCURRENCY, HttpUploadApi, RetryPolicy, UploadConfig, UploadCoordinator, UploadEvent,
    UploadOutcome,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tessera-upload")]
#[command(version)]
#[command(about = "Upload a file in resumable chunks")]
struct Cli {
    /// File to upload
    file: PathBuf,

    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:3000")]
    server: String,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Chunks in flight at once
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Attempts per chunk, including the first
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// MIME type recorded with the upload
    #[arg(long)]
    mime_type: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if cli.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be greater than zero");
    }
    if cli.concurrency == 0 {
        anyhow::bail!("--concurrency must be greater than zero");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(run(cli))?;

    match &outcome {
        UploadOutcome::Instant { .. } => println!("{} (already on server)", outcome.url()),
        UploadOutcome::Uploaded {
            width: Some(w),
            height: Some(h),
            ..
        } => println!("{} ({w}x{h})", outcome.url()),
        UploadOutcome::Uploaded { .. } => println!("{}", outcome.url()),
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<UploadOutcome> {
    let api = Arc::new(HttpUploadApi::new(&cli.server)?);
    let config = UploadConfig {
        chunk_size: cli.chunk_size,
        max_concurrency: cli.concurrency,
        retry: RetryPolicy {
            max_attempts: cli.retries.max(1),
            ..RetryPolicy::default()
        },
        mime_type: cli.mime_type,
    };

    let mut coordinator = UploadCoordinator::new(api, config);

    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after chunks in flight");
            cancel.cancel();
        }
    });

    info!(file = %cli.file.display(), server = %cli.server, "uploading");
    Ok(coordinator.upload(&cli.file).await?)
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::Hashing(p) => debug!(percent = p.percent, "hashing"),
        UploadEvent::Hashed(hash) => info!(%hash, "content hash computed"),
        UploadEvent::Resumed { already, total } => {
            info!(already, total, "resuming upload");
        }
        UploadEvent::ChunkUploaded { index, done, total } => {
            info!(index, "chunk {done}/{total} uploaded");
        }
        UploadEvent::ChunkRetry {
            index,
            attempt,
            error,
        } => warn!(index, attempt, %error, "retrying chunk"),
        UploadEvent::Merging => info!("all chunks sent, merging"),
        UploadEvent::Completed { url } => debug!(%url, "upload completed"),
    }
}
