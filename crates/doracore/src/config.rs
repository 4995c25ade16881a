//! Centralized configuration (§9 redesign flag: the source system read its
//! tunables from a scatter of `once_cell::Lazy<String>` globals evaluated at
//! first use; here they're collected into one `Config` loaded once at
//! startup via `figment`, with environment variables overriding defaults).

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub cache_dir: PathBuf,
    pub download_dir: PathBuf,

    pub download_concurrency: usize,
    pub conversion_concurrency: usize,
    pub optimization_concurrency: usize,
    pub transcription_concurrency: usize,

    pub max_upload_mb: u64,
    pub optimize_threshold_mb: u64,
    pub compress_target_mb: u64,

    pub downloaded_file_ttl_hours: i64,
    pub idle_sweep_interval_secs: u64,
    pub ttl_sweep_interval_secs: u64,

    pub ffmpeg_nice_level: i32,
    pub extract_timeout_secs: u64,
    pub voice_batch_debounce_millis: u64,

    pub cookies_path: Option<PathBuf>,
    pub proxy_url: Option<String>,

    /// Port the Prometheus `/metrics` endpoint listens on (§1.1 ambient stack).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("doradura.sqlite3"),
            cache_dir: PathBuf::from("cache"),
            download_dir: PathBuf::from("downloads"),
            download_concurrency: 10,
            conversion_concurrency: 8,
            optimization_concurrency: 4,
            transcription_concurrency: 8,
            max_upload_mb: 50,
            optimize_threshold_mb: 48,
            compress_target_mb: 49,
            downloaded_file_ttl_hours: 24,
            idle_sweep_interval_secs: 5 * 60,
            ttl_sweep_interval_secs: 60 * 60,
            ffmpeg_nice_level: 10,
            extract_timeout_secs: 600,
            voice_batch_debounce_millis: 500,
            cookies_path: None,
            proxy_url: None,
            metrics_port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from (in ascending priority): built-in defaults,
    /// `doradura.toml` in the current directory if present, then `DORADURA_*`
    /// environment variables.
    pub fn load() -> EngineResult<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("doradura.toml"))
            .merge(Env::prefixed("DORADURA_"));

        figment
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_source_constants() {
        let config = Config::default();
        assert_eq!(config.optimize_threshold_mb, 48);
        assert_eq!(config.compress_target_mb, 49);
        assert_eq!(config.max_upload_mb, 50);
        assert_eq!(config.ffmpeg_nice_level, 10);
    }

    #[test]
    #[serial]
    fn env_override_wins_over_default() {
        std::env::set_var("DORADURA_DOWNLOAD_CONCURRENCY", "3");
        let config = Config::load().unwrap();
        assert_eq!(config.download_concurrency, 3);
        std::env::remove_var("DORADURA_DOWNLOAD_CONCURRENCY");
    }
}
