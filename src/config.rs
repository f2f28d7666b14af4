//! Configuration loading and types for glancemeta.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, quotas, metadata persistence, seeded images,
//! logging, and observability.
//!
//! The quota is the only setting that can change while the process is
//! running.  It lives behind a [`QuotaHandle`] that the controller reads on
//! every write, so a reload takes effect on the next request.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-image quota settings.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Images registered with the store on startup.
    #[serde(default)]
    pub images: Vec<ImageSeed>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Quota configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Maximum number of metadata entries a single image may carry.
    #[serde(default = "default_max_metadata_items")]
    pub max_metadata_items: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_metadata_items: default_max_metadata_items(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `memory` or `sqlite`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// An image registered at startup, with the metadata it starts out with.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSeed {
    /// Opaque image identifier.
    pub id: String,

    /// Initial metadata. Ignored if the image is already known to the store.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the health probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Live quota --------------------------------------------------------------

/// Shared, mutable view of `quota.max_metadata_items`.
///
/// Cloning the handle shares the underlying value.
#[derive(Debug, Clone)]
pub struct QuotaHandle {
    max_metadata_items: Arc<AtomicUsize>,
}

impl QuotaHandle {
    pub fn new(max_metadata_items: usize) -> Self {
        Self {
            max_metadata_items: Arc::new(AtomicUsize::new(max_metadata_items)),
        }
    }

    /// Current limit on entries per image.
    pub fn max_metadata_items(&self) -> usize {
        self.max_metadata_items.load(Ordering::SeqCst)
    }

    /// Replace the limit. Subsequent operations observe the new value.
    pub fn set_max_metadata_items(&self, limit: usize) {
        self.max_metadata_items.store(limit, Ordering::SeqCst);
    }
}

impl From<&QuotaConfig> for QuotaHandle {
    fn from(config: &QuotaConfig) -> Self {
        Self::new(config.max_metadata_items)
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8774
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_metadata_items() -> usize {
    128
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/image-metadata.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
