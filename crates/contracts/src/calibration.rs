//! StereoCalibrationResult - calibration pipeline output

use serde::{Deserialize, Serialize};

use crate::{CameraIntrinsics, CameraKey, ImageSize, Rectification, StereoExtrinsics};

/// Key under which a pair's result is stored in its session.
pub fn stereo_result_key(a: &CameraKey, b: &CameraKey) -> String {
    format!("stereo_{a}_{b}")
}

/// Full stereo calibration of one camera pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibrationResult {
    pub camera_a: CameraKey,
    pub camera_b: CameraKey,

    /// Stereo reprojection error (pixels)
    pub reprojection_error: f64,

    pub intrinsics_a: CameraIntrinsics,
    pub intrinsics_b: CameraIntrinsics,

    /// Per-camera reprojection errors from the intrinsics stage
    pub intrinsics_error_a: f64,
    pub intrinsics_error_b: f64,

    pub extrinsics: StereoExtrinsics,
    pub rectification: Rectification,

    pub image_size: ImageSize,

    /// Image pairs where both frames showed the pattern
    pub pairs_used: usize,
}

impl StereoCalibrationResult {
    pub fn key(&self) -> String {
        stereo_result_key(&self.camera_a, &self.camera_b)
    }
}
