//! Device - registered capture device record
//!
//! Owned by the device registry; created on registration and never deleted
//! while the process runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::CameraKey;

/// Connection status of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connected,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
        }
    }
}

/// Capture device known to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,

    /// Address the registration arrived from
    pub address: SocketAddr,

    /// Declared camera ids, in registration order
    pub cameras: Vec<String>,

    /// Declared capability tags
    pub capabilities: Vec<String>,

    pub status: DeviceStatus,

    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Build a freshly connected device from a registration message.
    pub fn from_registration(
        registration: &crate::DeviceRegistration,
        address: SocketAddr,
    ) -> Self {
        Self {
            device_id: registration.device_id.clone(),
            device_name: registration.device_name.clone(),
            device_type: registration.device_type.clone(),
            address,
            cameras: registration.cameras.clone(),
            capabilities: registration.capabilities.clone(),
            status: DeviceStatus::Connected,
            last_seen: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == DeviceStatus::Connected
    }

    /// Camera keys for every declared camera.
    pub fn camera_keys(&self) -> impl Iterator<Item = CameraKey> + '_ {
        self.cameras
            .iter()
            .map(|camera| CameraKey::new(&self.device_id, camera))
    }
}
