//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the ZYPHRA_API_KEYS env var or `api_keys_file`,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use key_pool::{PoolConfig, RetryPolicy};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding comma-separated API keys.
pub const API_KEYS_ENV: &str = "ZYPHRA_API_KEYS";

/// Env var overriding the listen port.
const PORT_ENV: &str = "PORT";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Path to a file with one API key per line (alternative to ZYPHRA_API_KEYS)
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    /// Maximum JSON request body (voice samples are inlined as base64)
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            body_limit_bytes: 15 * 1024 * 1024,
        }
    }
}

/// Upstream synthesis API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: synthesis::http::DEFAULT_UPSTREAM_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Request validation bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_text_length: usize,
    pub max_voice_sample_bytes: usize,
    pub min_speaking_rate: f64,
    pub max_speaking_rate: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub supported_mime_types: Vec<String>,
    pub default_language: String,
    pub default_speaking_rate: f64,
    pub default_mime_type: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_length: 5000,
            max_voice_sample_bytes: 10 * 1024 * 1024,
            min_speaking_rate: 5.0,
            max_speaking_rate: 35.0,
            min_seconds: 1.0,
            max_seconds: 30.0,
            supported_mime_types: [
                "audio/wav",
                "audio/mp3",
                "audio/mpeg",
                "audio/webm",
                "audio/ogg",
                "audio/mp4",
                "audio/aac",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_language: "en-us".to_string(),
            default_speaking_rate: 15.0,
            default_mime_type: "audio/mp3".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. ZYPHRA_API_KEYS env var (comma separated)
    /// 2. api_keys_file path from config (one key per line)
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(port) = std::env::var(PORT_ENV) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| common::Error::Config(format!("invalid {PORT_ENV} {port:?}: {e}")))?;
            config.server.listen_addr.set_port(port);
        }

        // Resolve keys: env var takes precedence over file
        let raw_keys = if let Ok(keys) = std::env::var(API_KEYS_ENV) {
            split_keys(&keys, ',')
        } else if let Some(ref keys_file) = config.api_keys_file {
            let contents = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            split_keys(&contents, '\n')
        } else {
            Vec::new()
        };

        if raw_keys.is_empty() {
            return Err(common::Error::NoApiKeys(format!(
                "set {API_KEYS_ENV} or api_keys_file"
            )));
        }
        config.api_keys = raw_keys.into_iter().map(Secret::new).collect();

        Ok(config)
    }

    /// Reject values that would make the pool or the listener unusable.
    fn validate(&self) -> common::Result<()> {
        if !self.upstream.url.starts_with("http://") && !self.upstream.url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream.url must start with http:// or https://, got: {}",
                self.upstream.url
            )));
        }

        let positive = [
            ("upstream.timeout_secs", self.upstream.timeout_secs),
            ("server.max_connections", self.server.max_connections as u64),
            ("server.body_limit_bytes", self.server.body_limit_bytes as u64),
            ("pool.error_threshold", u64::from(self.pool.error_threshold)),
            ("pool.cooldown_secs", self.pool.cooldown_secs),
            ("pool.daily_limit", self.pool.daily_limit),
            ("pool.monthly_limit", self.pool.monthly_limit),
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.limits.min_speaking_rate > self.limits.max_speaking_rate {
            return Err(common::Error::Config(
                "limits.min_speaking_rate must not exceed max_speaking_rate".into(),
            ));
        }
        if self.limits.min_seconds > self.limits.max_seconds {
            return Err(common::Error::Config(
                "limits.min_seconds must not exceed max_seconds".into(),
            ));
        }
        if !self
            .limits
            .supported_mime_types
            .contains(&self.limits.default_mime_type)
        {
            return Err(common::Error::Config(format!(
                "limits.default_mime_type {} is not in supported_mime_types",
                self.limits.default_mime_type
            )));
        }

        Ok(())
    }

    /// Raw keys for pool construction.
    pub fn raw_api_keys(&self) -> Vec<String> {
        self.api_keys.iter().map(|k| k.expose().clone()).collect()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tts-gateway.toml")
    }
}

/// Split, trim, and drop empty entries.
fn split_keys(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
