//! Calibration image payload

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Encoded calibration frame as received from a device (zero-copy clone)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationImage {
    pub data: Bytes,
}

impl CalibrationImage {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
