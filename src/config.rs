//! Configuration management for midislot
//!
//! Handles loading, parsing, and validation of the YAML configuration file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::catalog::PortCounting;
use crate::platform::VirtualDevice;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Devices exposed by the virtual backend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_devices: Vec<VirtualDevice>,
}

/// Which platform backend the init action acquires
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// System MIDI through midir
    #[default]
    Midir,
    /// In-memory devices from `virtual_devices`
    Virtual,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Client name announced to the system MIDI API
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            client_name: default_client_name(),
        }
    }
}

/// Dispatch loop behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Upper bound on waiting for an asynchronous device open; 0 waits forever
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default)]
    pub port_counting: PortCounting,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: default_open_timeout_ms(),
            port_counting: PortCounting::default(),
        }
    }
}

impl DispatchConfig {
    /// Open timeout, `None` when unbounded
    pub fn open_timeout(&self) -> Option<Duration> {
        match self.open_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            info!("Config file {} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backend.client_name.trim().is_empty() {
            anyhow::bail!("backend.client_name cannot be empty");
        }

        for (index, device) in self.virtual_devices.iter().enumerate() {
            if device.inputs == 0 && device.outputs == 0 {
                anyhow::bail!("virtual device {} has no ports", index);
            }
        }

        Ok(())
    }
}

fn default_client_name() -> String { "midislot".to_string() }
fn default_open_timeout_ms() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OpenBehavior;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.backend.kind, BackendKind::Midir);
        assert_eq!(config.backend.client_name, "midislot");
        assert_eq!(config.dispatch.open_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.dispatch.port_counting, PortCounting::DeviceDirection);
        assert!(config.virtual_devices.is_empty());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
backend:
  kind: virtual
  client_name: bench
dispatch:
  open_timeout_ms: 0
  port_counting: legacy
virtual_devices:
  - manufacturer: Acme
    product: Synth
    inputs: 2
  - product: Keys
    outputs: 1
    open: hang
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Virtual);
        assert_eq!(config.backend.client_name, "bench");
        assert_eq!(config.dispatch.open_timeout(), None);
        assert_eq!(config.dispatch.port_counting, PortCounting::Legacy);
        assert_eq!(config.virtual_devices.len(), 2);
        assert_eq!(config.virtual_devices[1].open, OpenBehavior::Hang);
        assert_eq!(config.virtual_devices[1].manufacturer, None);
    }

    #[test]
    fn test_validation_rejects_empty_client_name() {
        let err = AppConfig::parse("backend:\n  client_name: \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("client_name"));
    }

    #[test]
    fn test_validation_rejects_portless_device() {
        assert!(AppConfig::parse("virtual_devices:\n  - product: Empty\n").is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = AppConfig::load_or_default(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.backend.client_name, "midislot");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midislot.yaml");
        tokio::fs::write(&path, "dispatch:\n  open_timeout_ms: 250\n").await.unwrap();

        let config = AppConfig::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.dispatch.open_timeout(), Some(Duration::from_millis(250)));
    }
}
