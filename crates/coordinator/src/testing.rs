//! In-crate fakes for the geometry, quality and sync collaborators

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Vector3};
use parking_lot::RwLock;

use contracts::{
    CalibrationImage, CameraCalibration, CameraGeometry, CameraIntrinsics, GeometryError,
    ImagePoints, ImageSize, ObjectPoints, PatternGeometry, PatternType, PixelRect,
    QualityAssessor, QualityResult, Rectification, StereoExtrinsics, StereoFlags, SyncQuality,
    SyncStatistics, SyncStatusSource,
};

use crate::error::CalibrationStage;

const BLANK: &[u8] = b"blank";

pub fn board_image() -> CalibrationImage {
    CalibrationImage::new(Bytes::from_static(b"board"))
}

/// Frame in which no pattern is found
pub fn blank_image() -> CalibrationImage {
    CalibrationImage::new(Bytes::from_static(BLANK))
}

/// Finds a pattern in every frame except blank ones and returns fixed
/// matrices. `fail_stage` makes one stage report a convergence failure.
#[derive(Default)]
pub struct FakeGeometry {
    pub fail_stage: Option<CalibrationStage>,
    pub calibrations: AtomicUsize,
}

impl FakeGeometry {
    pub fn failing(stage: CalibrationStage) -> Self {
        Self {
            fail_stage: Some(stage),
            ..Default::default()
        }
    }

    fn check(&self, stage: CalibrationStage) -> Result<(), GeometryError> {
        match self.fail_stage {
            Some(s) if s == stage => Err(GeometryError::not_converged(stage.as_str())),
            _ => Ok(()),
        }
    }

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            camera_matrix: Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0),
            distortion: vec![0.0; 5],
        }
    }
}

impl CameraGeometry for FakeGeometry {
    fn detect_pattern(
        &self,
        image: &CalibrationImage,
        pattern: &PatternGeometry,
    ) -> Result<Option<ImagePoints>, GeometryError> {
        self.check(CalibrationStage::PatternDetection)?;
        if image.data.as_ref() == BLANK {
            return Ok(None);
        }
        let points = (0..pattern.point_count())
            .map(|i| Point2::new(i as f64, i as f64))
            .collect();
        Ok(Some(points))
    }

    fn image_size(&self, _image: &CalibrationImage) -> Result<ImageSize, GeometryError> {
        Ok(ImageSize::new(640, 480))
    }

    fn calibrate_camera(
        &self,
        object_points: &[ObjectPoints],
        image_points: &[ImagePoints],
        _image_size: ImageSize,
    ) -> Result<CameraCalibration, GeometryError> {
        if object_points.len() != image_points.len() {
            return Err(GeometryError::invalid_input("view count mismatch"));
        }
        // first call per pair is camera A, second is camera B
        let call = self.calibrations.fetch_add(1, Ordering::SeqCst);
        let stage = if call % 2 == 0 {
            CalibrationStage::IntrinsicsA
        } else {
            CalibrationStage::IntrinsicsB
        };
        self.check(stage)?;
        Ok(CameraCalibration {
            reprojection_error: 0.25,
            intrinsics: Self::intrinsics(),
        })
    }

    fn stereo_calibrate(
        &self,
        _object_points: &[ObjectPoints],
        _image_points_a: &[ImagePoints],
        _image_points_b: &[ImagePoints],
        _intrinsics_a: &CameraIntrinsics,
        _intrinsics_b: &CameraIntrinsics,
        _image_size: ImageSize,
        flags: StereoFlags,
    ) -> Result<StereoExtrinsics, GeometryError> {
        self.check(CalibrationStage::StereoCalibration)?;
        if !flags.fix_intrinsic {
            return Err(GeometryError::invalid_input("intrinsics must be fixed"));
        }
        Ok(StereoExtrinsics {
            reprojection_error: 0.4,
            rotation: Matrix3::identity(),
            translation: Vector3::new(-0.1, 0.0, 0.0),
            essential: Matrix3::zeros(),
            fundamental: Matrix3::zeros(),
        })
    }

    fn stereo_rectify(
        &self,
        _intrinsics_a: &CameraIntrinsics,
        _intrinsics_b: &CameraIntrinsics,
        _image_size: ImageSize,
        _extrinsics: &StereoExtrinsics,
    ) -> Result<Rectification, GeometryError> {
        self.check(CalibrationStage::Rectification)?;
        let roi = PixelRect {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        };
        Ok(Rectification {
            r1: Matrix3::identity(),
            r2: Matrix3::identity(),
            p1: Matrix3x4::zeros(),
            p2: Matrix3x4::zeros(),
            q: Matrix4::identity(),
            roi1: roi,
            roi2: roi,
        })
    }
}

/// Scores every image with a fixed value
pub struct FixedQuality(pub f64);

impl QualityAssessor for FixedQuality {
    fn assess(&self, _image: &CalibrationImage, _pattern: PatternType) -> QualityResult {
        QualityResult::with_score(self.0)
    }
}

/// Sync source with per-device scripted quality
#[derive(Default)]
pub struct FakeSync {
    quality: RwLock<HashMap<String, SyncQuality>>,
}

impl FakeSync {
    pub fn set(&self, device_id: &str, quality: SyncQuality) {
        self.quality.write().insert(device_id.to_string(), quality);
    }

    pub fn clear(&self, device_id: &str) {
        self.quality.write().remove(device_id);
    }
}

impl SyncStatusSource for FakeSync {
    fn sync_statistics(&self, device_id: &str) -> Option<SyncStatistics> {
        let quality = *self.quality.read().get(device_id)?;
        Some(SyncStatistics {
            median_offset_ms: 1.0,
            mean_offset_ms: 1.0,
            std_offset_ms: 0.5,
            min_offset_ms: 0.5,
            max_offset_ms: 1.5,
            median_rtt_ms: 2.0,
            jitter_ms: 0.2,
            quality,
            sample_count: 10,
            window_s: 600.0,
        })
    }
}
