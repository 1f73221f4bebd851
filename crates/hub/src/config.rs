//! Hub configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::nxt::MAX_WRITE_CHUNK;

/// Default HTTP bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:8080";

/// Scratch Link relay for BLE peripherals (LWP3 hubs)
pub const DEFAULT_BLE_RELAY_URL: &str = "wss://device-manager.scratch.mit.edu:20110/scratch/ble";

/// Scratch Link relay for classic Bluetooth peripherals (NXT bricks)
pub const DEFAULT_BT_RELAY_URL: &str = "wss://device-manager.scratch.mit.edu:20110/scratch/bt";

/// Hub family spoken on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HubProtocol {
    /// LEGO Wireless Protocol v3 (BOOST, Powered Up, SPIKE, Control+)
    #[default]
    Poweredup,
    /// NXT direct commands
    Nxt,
}

impl std::fmt::Display for HubProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poweredup => f.write_str("poweredup"),
            Self::Nxt => f.write_str("nxt"),
        }
    }
}

/// How bytes reach the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Scratch Link style JSON-RPC relay over WebSocket
    #[default]
    Relay,
    /// Local HTTP bridge with notification polling
    Bridge,
    /// Native GATT backend supplied by the embedding application
    Ble,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    pub log_level: String,
    #[serde(default)]
    pub protocol: HubProtocol,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            protocol: HubProtocol::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub kind: TransportKind,
    /// Relay endpoint override; the default depends on the protocol
    #[serde(default)]
    pub relay_url: Option<String>,
    pub bridge_url: String,
    pub poll_interval_ms: u64,
    /// Bluetooth pairing PIN sent with NXT relay connects
    pub pin: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            relay_url: None,
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            poll_interval_ms: 100,
            pin: protocol::nxt::PAIRING_PIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    pub request_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub keep_alive_interval_ms: u64,
    /// Overrides the per-protocol ceiling (20/s LWP3, 40/s NXT)
    #[serde(default)]
    pub max_send_rate: Option<u32>,
    pub rate_limit_backoff_ms: u64,
    pub mode_settle_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            ping_interval_ms: 5000,
            keep_alive_interval_ms: 60_000,
            max_send_rate: None,
            rate_limit_backoff_ms: 50,
            mode_settle_ms: 100,
        }
    }
}

impl TimingSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn mode_settle(&self) -> Duration {
        Duration::from_millis(self.mode_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub progress_every_bytes: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: MAX_WRITE_CHUNK,
            chunk_delay_ms: 20,
            progress_every_bytes: 320,
        }
    }
}

impl HubConfig {
    /// Relay URL for the configured protocol
    pub fn relay_url(&self) -> String {
        self.transport
            .relay_url
            .clone()
            .unwrap_or_else(|| match self.hub.protocol {
                HubProtocol::Poweredup => DEFAULT_BLE_RELAY_URL.to_string(),
                HubProtocol::Nxt => DEFAULT_BT_RELAY_URL.to_string(),
            })
    }

    /// Send ceiling for the configured protocol
    pub fn max_send_rate(&self) -> u32 {
        self.timing.max_send_rate.unwrap_or(match self.hub.protocol {
            HubProtocol::Poweredup => protocol::lwp3::SEND_RATE_MAX,
            HubProtocol::Nxt => protocol::nxt::SEND_RATE_MAX,
        })
    }

    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HubConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!(
            "Config: protocol={}, transport={:?}",
            config.hub.protocol,
            config.transport.kind
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Logging is not initialised yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let path = expand_path(path);
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("lego-hub").join("hub.toml")
        } else {
            PathBuf::from(".config/lego-hub/hub.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !common::logging::is_valid_level(&self.hub.log_level) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: trace, debug, info, warn, error",
                self.hub.log_level
            ));
        }

        if !(1..=MAX_WRITE_CHUNK).contains(&self.transfer.chunk_size) {
            return Err(anyhow!(
                "transfer.chunk_size must be between 1 and {}, got {}",
                MAX_WRITE_CHUNK,
                self.transfer.chunk_size
            ));
        }

        if self.timing.max_send_rate == Some(0) {
            return Err(anyhow!("timing.max_send_rate must be greater than zero"));
        }

        if self.timing.request_timeout_ms == 0 {
            return Err(anyhow!("timing.request_timeout_ms must be greater than zero"));
        }

        if self.transport.poll_interval_ms == 0 {
            return Err(anyhow!("transport.poll_interval_ms must be greater than zero"));
        }

        if !(self.transport.bridge_url.starts_with("http://")
            || self.transport.bridge_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "transport.bridge_url must be an http(s) URL, got '{}'",
                self.transport.bridge_url
            ));
        }

        if let Some(url) = &self.transport.relay_url
            && !(url.starts_with("ws://") || url.starts_with("wss://"))
        {
            return Err(anyhow!(
                "transport.relay_url must be a ws(s) URL, got '{}'",
                url
            ));
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
