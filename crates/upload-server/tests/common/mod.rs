#![allow(dead_code)]

use std::net::SocketAddr;

use tempfile::TempDir;
use tessera_upload_server::{AppState, ServerConfig, UploadServer};
use tokio_util::sync::CancellationToken;

/// A server running on an ephemeral port over a throwaway data dir.
pub struct TestServer {
    pub addr: SocketAddr,
    pub data_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn start(durable: bool) -> Self {
        let data_dir = TempDir::new().unwrap();
        let state = AppState::open(data_dir.path(), durable, "/uploads", false).unwrap();
        let config = ServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
            max_chunk_bytes: 4 * 1024 * 1024,
        };
        let server = UploadServer::bind(config, state).await.unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_token();
        tokio::spawn(async move {
            server.run().await.unwrap();
        });
        Self {
            addr,
            data_dir,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Deterministic pseudo-random bytes.
pub fn test_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
