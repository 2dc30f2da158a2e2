use crate::core::options::ServerOptions;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/stompd.toml";
const KNOWN_VERSIONS: [&str; 3] = ["1.0", "1.1", "1.2"];

/// Top-level configuration for the stompd broker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub transactions: TransactionConfig,
    #[serde(default)]
    pub destinations: DestinationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// How often the server can emit heart-beats (`sx`), in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_send_ms: u64,
    /// How often the server wants to receive activity (`sy`), in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_expect_ms: u64,
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,
    /// Append a trailing EOL after each serialized frame.
    #[serde(default)]
    pub trailing_line: bool,
    #[serde(default = "default_max_body_length")]
    pub max_body_length: usize,
    #[serde(default = "default_max_header_length")]
    pub max_header_length: usize,
    #[serde(default = "default_max_headers")]
    pub max_headers: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            heartbeat_send_ms: default_heartbeat_ms(),
            heartbeat_expect_ms: default_heartbeat_ms(),
            supported_versions: default_supported_versions(),
            trailing_line: false,
            max_body_length: default_max_body_length(),
            max_header_length: default_max_header_length(),
            max_headers: default_max_headers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    /// Frames buffered per transaction before the connection is failed;
    /// `<= 0` disables the check.
    #[serde(default = "default_max_frames")]
    pub max_frames: i64,
    /// COMMIT replay chunk size; `0` replays the buffer in one piece.
    #[serde(default)]
    pub chunk_size: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            chunk_size: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Remove a destination once its last subscription is gone.
    #[serde(default = "default_auto_gc")]
    pub auto_gc: bool,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            auto_gc: default_auto_gc(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Require CONNECT frames to authenticate.
    #[serde(default)]
    pub secured: bool,
    /// Login to passcode table for the static provider.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:61613".to_string()
}

fn default_heartbeat_ms() -> u64 {
    1000
}

fn default_supported_versions() -> Vec<String> {
    KNOWN_VERSIONS.iter().map(|v| v.to_string()).collect()
}

fn default_max_body_length() -> usize {
    10 * 1024 * 1024
}

fn default_max_header_length() -> usize {
    10 * 1024
}

fn default_max_headers() -> usize {
    1000
}

fn default_max_frames() -> i64 {
    1000
}

fn default_auto_gc() -> bool {
    true
}

impl Config {
    /// Load configuration from the path in `STOMPD_CONFIG`, falling back to
    /// `config/stompd.toml`.
    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var("STOMPD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(path)
    }

    /// Load configuration from a specific file (TOML or JSON by extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        let cfg: Config = if is_json(path_ref) {
            serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?
        } else {
            toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Schema-level invariants checked before startup.
    pub fn validate(&self) -> Result<()> {
        if self.listener.bind.is_empty() {
            bail!("listener.bind must be non-empty");
        }
        if self.protocol.supported_versions.is_empty() {
            bail!("protocol.supported_versions must list at least one version");
        }
        for version in &self.protocol.supported_versions {
            if !KNOWN_VERSIONS.contains(&version.as_str()) {
                bail!("unsupported STOMP version {} in protocol.supported_versions", version);
            }
        }
        if self.protocol.max_headers == 0 || self.protocol.max_header_length == 0 {
            bail!("protocol frame limits must be > 0");
        }
        if self.auth.secured && self.auth.users.is_empty() {
            bail!("auth.secured requires at least one entry in auth.users");
        }
        Ok(())
    }

    /// Resolve the engine options from this configuration.
    pub fn server_options(&self) -> ServerOptions {
        let mut versions = self.protocol.supported_versions.clone();
        versions.sort();
        ServerOptions {
            heartbeat: (self.protocol.heartbeat_send_ms, self.protocol.heartbeat_expect_ms),
            supported_versions: versions,
            trailing_line: self.protocol.trailing_line,
            max_body_length: self.protocol.max_body_length,
            max_header_length: self.protocol.max_header_length,
            max_headers: self.protocol.max_headers,
            max_frames_in_transaction: self.transactions.max_frames,
            transaction_chunk_size: self.transactions.chunk_size,
            destination_auto_gc: self.destinations.auto_gc,
            secured: self.auth.secured,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
