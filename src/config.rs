//! Configuration management for Lumen GW
//!
//! Handles loading, parsing, and saving of YAML configuration files covering
//! network parameters, dispatcher tuning, sync defaults, and scene timelines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::color::ExtractionMode;
use crate::discovery::DiscoveryOptions;
use crate::dispatcher::DispatchOptions;
use crate::scene::Scene;
use crate::sync::SyncOptions;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenes: Vec<Scene>,
}

/// LAN protocol endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_response_port")]
    pub response_port: u16,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            discovery_port: default_discovery_port(),
            response_port: default_response_port(),
            control_port: default_control_port(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

/// Command dispatch tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            pacing_delay_ms: default_pacing_delay_ms(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }
}

/// Sync session defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_extraction_mode")]
    pub mode: ExtractionMode,
    #[serde(default = "default_zone_count")]
    pub zone_count: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_latency_compensation_ms")]
    pub latency_compensation_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            mode: default_extraction_mode(),
            zone_count: default_zone_count(),
            smoothing: default_smoothing(),
            latency_compensation_ms: default_latency_compensation_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            warn!("Config file '{}' not found; using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            timeout: Duration::from_millis(self.network.discovery_timeout_ms),
            multicast_group: self.network.multicast_group,
            discovery_port: self.network.discovery_port,
            response_port: self.network.response_port,
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            max_attempts: self.dispatch.max_attempts.max(1),
            retry_delay: Duration::from_millis(self.dispatch.retry_delay_ms),
            pacing_delay: Duration::from_millis(self.dispatch.pacing_delay_ms),
            status_timeout: Duration::from_millis(self.dispatch.status_timeout_ms),
            control_port: self.network.control_port,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            sample_rate_hz: self.sync.sample_rate_hz,
            mode: self.sync.mode,
            zone_count: self.sync.zone_count,
            smoothing: self.sync.smoothing,
            latency_compensation: Duration::from_millis(self.sync.latency_compensation_ms),
            device_ids: Vec::new(),
        }
    }

    /// Look up a configured scene by name (case insensitive)
    pub fn scene(&self, name: &str) -> Option<Scene> {
        self.scenes
            .iter()
            .find(|scene| scene.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

// Default value functions
fn default_multicast_group() -> Ipv4Addr { Ipv4Addr::new(239, 255, 255, 250) }
fn default_discovery_port() -> u16 { 4001 }
fn default_response_port() -> u16 { 4002 }
fn default_control_port() -> u16 { 4001 }
fn default_discovery_timeout_ms() -> u64 { 5000 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_pacing_delay_ms() -> u64 { 50 }
fn default_status_timeout_ms() -> u64 { 2000 }
fn default_sample_rate_hz() -> u32 { 30 }
fn default_extraction_mode() -> ExtractionMode { ExtractionMode::Average }
fn default_zone_count() -> usize { 3 }
fn default_smoothing() -> f32 { 0.6 }
fn default_latency_compensation_ms() -> u64 { 50 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let config = AppConfig::default();
        assert_eq!(config.network.multicast_group.to_string(), "239.255.255.250");
        assert_eq!(config.network.discovery_port, 4001);
        assert_eq!(config.network.response_port, 4002);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.retry_delay_ms, 500);
        assert_eq!(config.dispatch.pacing_delay_ms, 50);
        assert_eq!(config.sync.sample_rate_hz, 30);
        assert_eq!(config.sync.latency_compensation_ms, 50);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
network:
  discovery_timeout_ms: 1500
sync:
  mode: zones
  zone_count: 4
"#,
        )
        .unwrap();

        assert_eq!(config.network.discovery_timeout_ms, 1500);
        assert_eq!(config.network.discovery_port, 4001);
        assert_eq!(config.sync.mode, ExtractionMode::Zones);
        assert_eq!(config.sync.zone_count, 4);
        assert_eq!(config.sync.sample_rate_hz, 30);
    }

    #[test]
    fn scenes_parse_from_yaml() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
scenes:
  - name: sunset
    loop_playback: true
    keyframes:
      - at_ms: 0
        color: { r: 255, g: 120, b: 0 }
        brightness: 90
      - at_ms: 4000
        color: { r: 120, g: 0, b: 90 }
        brightness: 40
        transition: step
"#,
        )
        .unwrap();

        let scene = config.scene("Sunset").unwrap();
        assert!(scene.loop_playback);
        assert_eq!(scene.keyframes.len(), 2);
        assert_eq!(scene.keyframes[1].brightness, 40);
        assert!(config.scene("nope").is_none());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.network.discovery_timeout_ms = 1234;
        config.save(path).await.unwrap();

        let loaded = AppConfig::load(path).await.unwrap();
        assert_eq!(loaded.network.discovery_timeout_ms, 1234);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_or_default("/definitely/not/here.yaml")
            .await
            .unwrap();
        assert_eq!(config.network.discovery_port, 4001);
    }
}
