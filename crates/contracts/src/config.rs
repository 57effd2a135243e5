//! Coordinator configuration contracts shared across crates.
//!
//! Every section and field has a default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub network: NetworkConfig,
    pub clock_sync: ClockSyncConfig,
    pub session: SessionConfig,
    pub dispatcher: DispatcherConfig,
}

/// Coordination socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_addr: String,
    /// Upper bound on how long `stop()` waits for the accept loop
    pub accept_timeout_ms: u64,
    /// How long a connection worker waits on an idle device before
    /// re-checking for shutdown. Idle devices stay connected.
    pub read_timeout_ms: u64,
    /// Bound on one outbound write; a device that stops reading is dropped
    pub write_timeout_ms: u64,
    /// Longest accepted line (base64 images included)
    pub max_frame_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8910".to_string(),
            accept_timeout_ms: 1000,
            read_timeout_ms: 60_000,
            write_timeout_ms: 5_000,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Clock synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    /// UDP port of the device-side clock responder
    pub port: u16,
    pub interval_ms: u64,
    /// Per-exchange reply timeout
    pub timeout_ms: u64,
    pub history_capacity: usize,
    /// Fewer samples than this in the window means no statistics
    pub min_samples: usize,
    pub stats_window_s: u64,
    pub burst_samples: usize,
    /// Method used by the background scheduler
    pub method: crate::SyncMethod,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            port: 8123,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            history_capacity: 1000,
            min_samples: 2,
            stats_window_s: 600,
            burst_samples: 5,
            method: crate::SyncMethod::Simple,
        }
    }
}

impl ClockSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_s)
    }
}

/// Session defaults and gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_target_images: usize,
    pub default_quality_threshold: f64,
    /// Usable image pairs required before stereo calibration runs
    pub min_stereo_pairs: usize,
    /// Refuse externally requested phase changes while any session device is poorly synced
    pub require_sync_quality: bool,
    /// Calibrate every camera pair when collection completes
    pub auto_calibrate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_target_images: 20,
            default_quality_threshold: 0.7,
            min_stereo_pairs: 10,
            require_sync_quality: true,
            auto_calibrate: true,
        }
    }
}

/// Queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Inbound queue between connection workers and the processing loop
    pub inbound_capacity: usize,
    /// Per-device outbound command queue
    pub outbound_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 256,
            outbound_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.network.bind_addr, "0.0.0.0:8910");
        assert_eq!(config.clock_sync.port, 8123);
        assert_eq!(config.clock_sync.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_section() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"session":{"min_stereo_pairs":4}}"#).unwrap();
        assert_eq!(config.session.min_stereo_pairs, 4);
        assert_eq!(config.session.default_target_images, 20);
    }
}
