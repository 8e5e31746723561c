//! Node configuration
//!
//! One TOML file per node. Every section has defaults matching the stock
//! six-port board, so an empty file (or the generated default) is a working
//! root configuration on real hardware.

use crate::relay::{PortPins, DEFAULT_PORTS, DEFAULT_RESET_PIN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const APP_DIR: &str = "relaymesh";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("No config directory on this system")]
    NoConfigDir,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Bridges the mesh to the broker
    #[default]
    Root,
    Leaf,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    #[default]
    Rppal,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: Role,
    pub device_name: String,
    pub identity: IdentityConfig,
    pub gpio: GpioConfig,
    pub timing: TimingConfig,
    pub broker: BrokerConfig,
    pub mesh: MeshConfig,
    pub storage: StorageConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            device_name: crate::device::DEVICE_NAME.to_string(),
            identity: IdentityConfig::default(),
            gpio: GpioConfig::default(),
            timing: TimingConfig::default(),
            broker: BrokerConfig::default(),
            mesh: MeshConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Interface whose hardware address names the node
    pub interface: String,
    /// Fixed address, overrides `interface` (useful off-target)
    pub hardware_address: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            hardware_address: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: GpioBackend,
    pub reset_pin: u8,
    pub settle_ms: u64,
    /// Button pins wired on the simulated board
    pub simulated_wired: Vec<u8>,
    pub ports: Vec<PortPins>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::default(),
            reset_pin: DEFAULT_RESET_PIN,
            settle_ms: 1,
            simulated_wired: Vec::new(),
            ports: DEFAULT_PORTS.to_vec(),
        }
    }
}

impl GpioConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: u64,
    pub poll_ms: u64,
    pub reset_poll_ms: u64,
    /// Consecutive asserted reset samples that trigger a factory reset
    pub reset_hold_polls: u32,
    pub announce_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 10,
            poll_ms: 100,
            reset_poll_ms: 100,
            reset_hold_polls: 30,
            announce_secs: 30,
        }
    }
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn reset_poll(&self) -> Duration {
        Duration::from_millis(self.reset_poll_ms)
    }

    pub fn announce(&self) -> Duration {
        Duration::from_secs(self.announce_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Defaults to `relaymesh-<deviceID>`
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub up_prefix: String,
    pub down_prefix: String,
    pub reconnect_delay_ms: u64,
    pub capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            up_prefix: "up/MAC".to_string(),
            down_prefix: "down/MAC".to_string(),
            reconnect_delay_ms: 2000,
            capacity: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub bind: String,
    /// Root socket address; required for leaves
    pub upstream: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4210".to_string(),
            upstream: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join(APP_DIR).join("flags.toml"),
        }
    }
}

pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

impl NodeConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the default config to `path` unless a file is already there
    pub async fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if tokio::fs::try_exists(path).await.map_err(io)? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }

        let content = toml::to_string_pretty(&NodeConfig::default())?;
        tokio::fs::write(path, content).await.map_err(io)?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            role = "leaf"

            [mesh]
            upstream = "10.0.0.1:4210"

            [timing]
            debounce_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Leaf);
        assert_eq!(config.mesh.upstream.as_deref(), Some("10.0.0.1:4210"));
        assert_eq!(config.mesh.bind, "0.0.0.0:4210");
        assert_eq!(config.timing.debounce(), Duration::from_millis(20));
        assert_eq!(config.timing.reset_hold_polls, 30);
        assert_eq!(config.gpio.ports.len(), 6);
        assert_eq!(config.gpio.reset_pin, 4);
    }

    #[tokio::test]
    async fn default_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaymesh").join("config.toml");

        NodeConfig::ensure_default(&path).await.unwrap();
        let loaded = NodeConfig::load(&path).await.unwrap();
        assert_eq!(loaded, NodeConfig::default());

        tokio::fs::write(&path, "role = \"leaf\"").await.unwrap();
        NodeConfig::ensure_default(&path).await.unwrap();
        assert_eq!(NodeConfig::load(&path).await.unwrap().role, Role::Leaf);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "role = \"bridge\"").await.unwrap();
        assert!(matches!(
            NodeConfig::load(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }
}
