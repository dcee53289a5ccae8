//! Process configuration, loaded once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub tus_path: String,
    pub storage_dir: PathBuf,
    pub max_upload_size_bytes: u64,

    pub minio_endpoint: String,
    pub minio_port: u16,
    pub minio_use_ssl: bool,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub minio_bucket: String,

    pub reaper_interval: Duration,
    pub reaper_stale_threshold: Duration,
    pub failed_upload_history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            tus_path: "/files".to_string(),
            storage_dir: PathBuf::from("./.data/tus"),
            max_upload_size_bytes: 21_474_836_480,
            minio_endpoint: "localhost".to_string(),
            minio_port: 9000,
            minio_use_ssl: false,
            minio_access_key: String::new(),
            minio_secret_key: String::new(),
            minio_bucket: "wedocs".to_string(),
            reaper_interval: Duration::from_secs(3600),
            reaper_stale_threshold: Duration::from_secs(3600),
            failed_upload_history_limit: 500,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// `Default::default()` for anything unset. A variable that is present
    /// but fails to parse is a fatal startup error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            port: env_parsed("PORT", defaults.port)?,
            tus_path: env_string("TUS_PATH", &defaults.tus_path),
            storage_dir: PathBuf::from(env_string(
                "TUS_STORAGE_DIR",
                &defaults.storage_dir.to_string_lossy(),
            )),
            max_upload_size_bytes: env_parsed(
                "MAX_UPLOAD_SIZE_BYTES",
                defaults.max_upload_size_bytes,
            )?,
            minio_endpoint: env_string("MINIO_ENDPOINT", &defaults.minio_endpoint),
            minio_port: env_parsed("MINIO_PORT", defaults.minio_port)?,
            minio_use_ssl: env_bool("MINIO_USE_SSL", defaults.minio_use_ssl)?,
            minio_access_key: env_string("MINIO_ACCESS_KEY", &defaults.minio_access_key),
            minio_secret_key: env_string("MINIO_SECRET_KEY", &defaults.minio_secret_key),
            minio_bucket: env_string("MINIO_BUCKET", &defaults.minio_bucket),
            reaper_interval: Duration::from_secs(env_parsed(
                "REAPER_INTERVAL_SECONDS",
                defaults.reaper_interval.as_secs(),
            )?),
            reaper_stale_threshold: Duration::from_secs(env_parsed(
                "REAPER_STALE_THRESHOLD_SECONDS",
                defaults.reaper_stale_threshold.as_secs(),
            )?),
            failed_upload_history_limit: env_parsed(
                "FAILED_UPLOAD_HISTORY_LIMIT",
                defaults.failed_upload_history_limit,
            )?,
        })
    }

    /// Builds the opendal S3 endpoint URL from the discrete connection
    /// parameters (scheme, host, port).
    pub fn minio_endpoint_url(&self) -> String {
        let scheme = if self.minio_use_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.minio_endpoint, self.minio_port)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => anyhow::bail!("invalid boolean value for {key}: {other:?}"),
        },
        Err(_) => Ok(default),
    }
}
