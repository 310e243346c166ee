use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the eventmaster edge.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP API server configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// rsyslog ingestion server configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// In-memory event store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Listen address. Default: ":50052".
    #[serde(default = "default_http_addr")]
    pub addr: String,
}

/// rsyslog ingestion server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Start the ingestion listener. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":50053".
    #[serde(default = "default_ingest_addr")]
    pub addr: String,

    /// Maximum bytes read from one connection. Default: 20000.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Deadline for the TLS handshake plus the single read. 0s disables.
    /// Default: 30s.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Maximum connections handled concurrently. Default: 1024.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Serve TLS instead of plaintext when set.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// In-memory event store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Events retained before the oldest are evicted. Default: 100000.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

/// PEM-encoded TLS material for the ingestion listener.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Server certificate chain.
    pub cert_file: PathBuf,

    /// Server private key.
    pub key_file: PathBuf,

    /// CA bundle used to verify client certificates, when presented.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_addr() -> String {
    ":50052".to_string()
}

fn default_ingest_addr() -> String {
    ":50053".to_string()
}

fn default_read_buffer_size() -> usize {
    20000
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_events() -> usize {
    crate::store::DEFAULT_MAX_EVENTS
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http: HttpConfig::default(),
            ingest: IngestConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_ingest_addr(),
            read_buffer_size: default_read_buffer_size(),
            read_timeout: default_read_timeout(),
            max_connections: default_max_connections(),
            tls: None,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.http.addr.is_empty() {
            bail!("http.addr is required");
        }

        if self.ingest.enabled {
            if self.ingest.addr.is_empty() {
                bail!("ingest.addr is required when enabled");
            }
            if self.ingest.read_buffer_size == 0 {
                bail!("ingest.read_buffer_size must be positive");
            }
            if self.ingest.max_connections == 0 {
                bail!("ingest.max_connections must be positive");
            }
        }

        if self.store.max_events == 0 {
            bail!("store.max_events must be positive");
        }

        if let Some(tls) = &self.ingest.tls {
            if tls.cert_file.as_os_str().is_empty() {
                bail!("ingest.tls.cert_file is required when tls is set");
            }
            if tls.key_file.as_os_str().is_empty() {
                bail!("ingest.tls.key_file is required when tls is set");
            }
        }

        Ok(())
    }
}

/// Expands the ":port" shorthand to an all-interfaces bind address.
pub fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
