//! CameraGeometry - external camera-geometry library interface
//!
//! The coordinator decides when these routines run and with which frames;
//! the numerics live behind this trait.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{CalibrationImage, GeometryError, ImageSize, PatternGeometry};

/// Pattern features found in one frame, in pixel coordinates
pub type ImagePoints = Vec<Point2<f64>>;

/// Object-point template for one view, in board coordinates
pub type ObjectPoints = Vec<Point3<f64>>;

/// Pinhole intrinsics with distortion coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Vec<f64>,
}

/// Output of single-camera calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub reprojection_error: f64,
    pub intrinsics: CameraIntrinsics,
}

/// Relative pose between two cameras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    pub reprojection_error: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub essential: Matrix3<f64>,
    pub fundamental: Matrix3<f64>,
}

/// Valid pixel region after rectification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Rectification transforms for a stereo pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectification {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    pub q: Matrix4<f64>,
    pub roi1: PixelRect,
    pub roi2: PixelRect,
}

/// Options for stereo calibration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoFlags {
    /// Keep both cameras' intrinsics fixed and only solve the relative pose
    pub fix_intrinsic: bool,
}

impl StereoFlags {
    pub const FIX_INTRINSIC: StereoFlags = StereoFlags {
        fix_intrinsic: true,
    };
}

/// Camera-geometry routines consumed by the calibration pipeline.
///
/// Implementations are called from a blocking worker thread.
pub trait CameraGeometry: Send + Sync {
    /// Locate the pattern in `image`. `Ok(None)` means not found.
    fn detect_pattern(
        &self,
        image: &CalibrationImage,
        pattern: &PatternGeometry,
    ) -> Result<Option<ImagePoints>, GeometryError>;

    /// Pixel dimensions of `image`.
    fn image_size(&self, image: &CalibrationImage) -> Result<ImageSize, GeometryError>;

    fn calibrate_camera(
        &self,
        object_points: &[ObjectPoints],
        image_points: &[ImagePoints],
        image_size: ImageSize,
    ) -> Result<CameraCalibration, GeometryError>;

    #[allow(clippy::too_many_arguments)]
    fn stereo_calibrate(
        &self,
        object_points: &[ObjectPoints],
        image_points_a: &[ImagePoints],
        image_points_b: &[ImagePoints],
        intrinsics_a: &CameraIntrinsics,
        intrinsics_b: &CameraIntrinsics,
        image_size: ImageSize,
        flags: StereoFlags,
    ) -> Result<StereoExtrinsics, GeometryError>;

    fn stereo_rectify(
        &self,
        intrinsics_a: &CameraIntrinsics,
        intrinsics_b: &CameraIntrinsics,
        image_size: ImageSize,
        extrinsics: &StereoExtrinsics,
    ) -> Result<Rectification, GeometryError>;
}
