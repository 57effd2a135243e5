//! Wire envelopes exchanged with devices over the coordination socket.
//!
//! One JSON object per line. Inbound objects carry a `type` tag; outbound
//! commands carry `command_type`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CalibrationImage, ContractError, QualityResult};

/// Seconds since the unix epoch as f64, the timestamp unit used on the wire.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Any message a device may send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    DeviceRegistration(DeviceRegistration),
    CalibrationResponse(CalibrationResponse),
    ImageData(ImageSubmission),
}

impl InboundMessage {
    /// Parse one framed line.
    pub fn from_json(line: &str) -> Result<Self, ContractError> {
        serde_json::from_str(line).map_err(|e| ContractError::malformed(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceRegistration(_) => "device_registration",
            Self::CalibrationResponse(_) => "calibration_response",
            Self::ImageData(_) => "image_data",
        }
    }

    /// Device that produced the message.
    pub fn device_id(&self) -> &str {
        match self {
            Self::DeviceRegistration(m) => &m.device_id,
            Self::CalibrationResponse(m) => &m.device_id,
            Self::ImageData(m) => &m.device_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    #[serde(default)]
    pub cameras: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Kind of acknowledgement a device reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    CalibrationStarted,
    ImageCaptured,
    CalibrationCompleted,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResponse {
    pub response_type: ResponseKind,
    pub session_id: String,
    pub device_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default = "unix_timestamp")]
    pub timestamp: f64,
}

/// Captured calibration frame with the device-side quality verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSubmission {
    pub session_id: String,
    pub device_id: String,
    pub camera_id: String,
    /// Base64 of the encoded image file
    pub image_data: String,
    #[serde(default)]
    pub quality_result: QualityResult,
}

impl ImageSubmission {
    /// Decode the base64 payload.
    pub fn decode_image(&self) -> Result<CalibrationImage, ContractError> {
        let raw = STANDARD
            .decode(self.image_data.as_bytes())
            .map_err(|e| ContractError::image_payload(&self.device_id, e.to_string()))?;
        Ok(CalibrationImage::new(Bytes::from(raw)))
    }

    pub fn encode_image(data: &[u8]) -> String {
        STANDARD.encode(data)
    }
}

/// Outbound command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartCalibration,
    PhaseChanged,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartCalibration => "start_calibration",
            Self::PhaseChanged => "phase_changed",
        }
    }
}

/// Command broadcast from the coordinator to devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationCommand {
    pub command_type: CommandKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub timestamp: f64,
}

impl CalibrationCommand {
    pub fn new(command_type: CommandKind, session_id: impl Into<String>) -> Self {
        Self {
            command_type,
            session_id: session_id.into(),
            target_device: None,
            parameters: Map::new(),
            timestamp: unix_timestamp(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Serialize as one newline-terminated frame.
    pub fn to_line(&self) -> Result<String, ContractError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| ContractError::encode("calibration_command", e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}
