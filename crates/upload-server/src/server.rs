//! Listener lifecycle for the upload API.

use std::net::SocketAddr;

use tessera_protocol::constants::DEFAULT_MAX_CHUNK_BYTES;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{AppState, ServerError, router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Largest accepted chunk payload in bytes.
    pub max_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 3000).into(),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// A bound upload server, ready to [`run`](Self::run).
pub struct UploadServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
    max_chunk_bytes: usize,
    cancel: CancellationToken,
}

impl UploadServer {
    /// Binds the listening socket.
    pub async fn bind(config: ServerConfig, state: AppState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            state,
            max_chunk_bytes: config.max_chunk_bytes,
            cancel: CancellationToken::new(),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves requests until the shutdown token is cancelled.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = router(self.state, self.max_chunk_bytes);
        tracing::info!("upload server listening on {}", self.local_addr);

        let cancel = self.cancel.clone();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("upload server stopped");
        Ok(())
    }
}
