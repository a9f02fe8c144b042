//! Server configuration.
//!
//! Stored as TOML at `$TESSERA_CONFIG` when set, otherwise:
//! - Linux: `~/.config/tessera/server.toml`
//! - Windows: `%APPDATA%/tessera/server.toml`
//!
//! A missing file is created with defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_protocol::constants::DEFAULT_MAX_CHUNK_BYTES;

/// Where upload state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Lost on restart.
    Memory,
    /// `registry.db` inside `data_dir`.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Root for chunks, artifacts and the registry database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Prefix of published artifact URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_registry")]
    pub registry: RegistryBackend,

    /// Largest accepted chunk in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Delete chunks once their artifact is published.
    #[serde(default)]
    pub cleanup_chunks_after_merge: bool,
}

fn default_bind() -> String {
    "0.0.0.0:3000".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_base_url() -> String {
    "/uploads".into()
}

fn default_registry() -> RegistryBackend {
    RegistryBackend::Sqlite
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            public_base_url: default_public_base_url(),
            registry: default_registry(),
            max_chunk_bytes: default_max_chunk_bytes(),
            cleanup_chunks_after_merge: false,
        }
    }
}

impl Config {
    /// Loads from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {:?}: {e}", self.bind))
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TESSERA_CONFIG") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("tessera").join("server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("tessera")
            .join("server.toml")
    }
}
