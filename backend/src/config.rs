//! Environment configuration.
//!
//! | Variable                     | Default        |
//! |------------------------------|----------------|
//! | `CHUNKLOAD_PORT`             | `3000`         |
//! | `CHUNKLOAD_UPLOAD_DIR`       | `.chunkload/uploads` |
//! | `CHUNKLOAD_SESSION_DIR`      | unset (memory) |
//! | `CHUNKLOAD_SESSION_TTL_SECS` | `3600`         |
//! | `CHUNKLOAD_CHUNK_SIZE`       | `50`           |
//!
//! A `.env` file in the working directory is loaded first.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::DEFAULT_CHUNK_SIZE;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_UPLOAD_DIR: &str = ".chunkload/uploads";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub upload_dir: PathBuf,
    /// Where sessions are saved. In memory only when `None`.
    pub session_dir: Option<PathBuf>,
    pub session_ttl: Duration,
    pub reap_interval: Duration,
    pub chunk_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let session_ttl = Duration::from_secs(DEFAULT_SESSION_TTL_SECS);
        Self {
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            session_dir: None,
            session_ttl,
            reap_interval: reap_interval_for(session_ttl),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Reap a few times per TTL, at most once a minute.
fn reap_interval_for(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

fn parse_var<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

impl AppConfig {
    /// Load `.env`, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset or empty variables keep the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("CHUNKLOAD_PORT") {
            config.port = parse_var("CHUNKLOAD_PORT", v)?;
        }
        if let Some(v) = get("CHUNKLOAD_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CHUNKLOAD_SESSION_DIR") {
            config.session_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CHUNKLOAD_SESSION_TTL_SECS") {
            let secs: u64 = parse_var("CHUNKLOAD_SESSION_TTL_SECS", v.clone())?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue { name: "CHUNKLOAD_SESSION_TTL_SECS", value: v });
            }
            config.session_ttl = Duration::from_secs(secs);
            config.reap_interval = reap_interval_for(config.session_ttl);
        }
        if let Some(v) = get("CHUNKLOAD_CHUNK_SIZE") {
            let size: usize = parse_var("CHUNKLOAD_CHUNK_SIZE", v.clone())?;
            if size == 0 {
                return Err(ConfigError::InvalidValue { name: "CHUNKLOAD_CHUNK_SIZE", value: v });
            }
            config.chunk_size = size;
        }

        Ok(config)
    }
}
