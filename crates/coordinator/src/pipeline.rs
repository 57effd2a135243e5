//! CalibrationPipeline - stereo calibration of one camera pair
//!
//! Orchestration only: the numerics come from a [`CameraGeometry`]
//! implementation, run on a blocking worker thread.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use contracts::{
    CalibrationImage, CalibrationPhase, CameraGeometry, CameraKey, ImagePoints, ObjectPoints,
    PatternGeometry, StereoCalibrationResult, StereoFlags, stereo_result_key,
};

use crate::error::{CalibrationError, CalibrationStage};
use crate::session::SessionStore;

pub struct CalibrationPipeline {
    sessions: Arc<SessionStore>,
    geometry: Arc<dyn CameraGeometry>,
    min_pairs: usize,
}

impl CalibrationPipeline {
    pub fn new(
        sessions: Arc<SessionStore>,
        geometry: Arc<dyn CameraGeometry>,
        min_pairs: usize,
    ) -> Self {
        Self {
            sessions,
            geometry,
            min_pairs: min_pairs.max(1),
        }
    }

    pub fn min_pairs(&self) -> usize {
        self.min_pairs
    }

    /// Calibrate `camera_a` against `camera_b` and store the result in the
    /// session under `stereo_<a>_<b>`.
    #[instrument(
        name = "pipeline_calibrate_stereo_pair",
        skip(self, camera_a, camera_b),
        fields(camera_a = %camera_a, camera_b = %camera_b)
    )]
    pub async fn calibrate_stereo_pair(
        &self,
        session_id: &str,
        camera_a: &CameraKey,
        camera_b: &CameraKey,
    ) -> Result<StereoCalibrationResult, CalibrationError> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CalibrationError::UnknownSession {
                session_id: session_id.to_string(),
            })?;

        let (pattern, images_a, images_b) = {
            let session = handle.lock();
            if session.phase.is_terminal() {
                return Err(CalibrationError::SessionCompleted {
                    session_id: session_id.to_string(),
                });
            }
            let images_a = session.images.get(camera_a).cloned().unwrap_or_default();
            let images_b = session.images.get(camera_b).cloned().unwrap_or_default();
            check_counts(camera_a, &images_a, camera_b, &images_b)?;
            (session.params.pattern_type.geometry(), images_a, images_b)
        };

        let geometry = Arc::clone(&self.geometry);
        let min_pairs = self.min_pairs;
        let (key_a, key_b) = (camera_a.clone(), camera_b.clone());
        let outcome = tokio::task::spawn_blocking(move || {
            solve_pair(
                geometry.as_ref(),
                &pattern,
                &key_a,
                &images_a,
                &key_b,
                &images_b,
                min_pairs,
            )
        })
        .await
        .map_err(|e| CalibrationError::Worker {
            message: e.to_string(),
        })
        .and_then(|r| r);

        let pair_key = stereo_result_key(camera_a, camera_b);
        observability::metrics::record_stereo_calibration(&pair_key, outcome.is_ok());
        let result = outcome?;

        {
            let mut session = handle.lock();
            if session.phase == CalibrationPhase::Completion {
                return Err(CalibrationError::SessionCompleted {
                    session_id: session_id.to_string(),
                });
            }
            session.results.insert(pair_key.clone(), result.clone());
        }

        info!(
            session_id,
            pair = %pair_key,
            pairs_used = result.pairs_used,
            reprojection_error = result.reprojection_error,
            "Stereo pair calibrated"
        );
        Ok(result)
    }

    /// Calibrate every unordered pair of tracked cameras, in key order.
    pub async fn calibrate_session(
        &self,
        session_id: &str,
    ) -> Vec<(String, Result<StereoCalibrationResult, CalibrationError>)> {
        let keys: Vec<CameraKey> = match self.sessions.get(session_id) {
            Some(handle) => handle.lock().images.keys().cloned().collect(),
            None => return Vec::new(),
        };

        let mut outcomes = Vec::new();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                let outcome = self.calibrate_stereo_pair(session_id, a, b).await;
                if let Err(e) = &outcome {
                    warn!(session_id, camera_a = %a, camera_b = %b, error = %e, "Stereo calibration failed");
                }
                outcomes.push((stereo_result_key(a, b), outcome));
            }
        }
        outcomes
    }
}

fn check_counts(
    camera_a: &CameraKey,
    images_a: &[CalibrationImage],
    camera_b: &CameraKey,
    images_b: &[CalibrationImage],
) -> Result<(), CalibrationError> {
    for (key, images) in [(camera_a, images_a), (camera_b, images_b)] {
        if images.is_empty() {
            return Err(CalibrationError::MissingImages {
                camera_key: key.to_string(),
            });
        }
    }
    if images_a.len() != images_b.len() {
        return Err(CalibrationError::MismatchedCounts {
            camera_a: camera_a.to_string(),
            count_a: images_a.len(),
            camera_b: camera_b.to_string(),
            count_b: images_b.len(),
        });
    }
    Ok(())
}

fn detect(
    geometry: &dyn CameraGeometry,
    image: &CalibrationImage,
    pattern: &PatternGeometry,
    camera: &CameraKey,
) -> Option<ImagePoints> {
    match geometry.detect_pattern(image, pattern) {
        Ok(points) => points,
        Err(e) => {
            warn!(camera = %camera, error = %e, "Pattern detection failed, frame skipped");
            None
        }
    }
}

/// Run the stereo pipeline over two equally long image lists.
///
/// Frames are paired by index; a pair is usable only when both frames show
/// the pattern.
pub fn solve_pair(
    geometry: &dyn CameraGeometry,
    pattern: &PatternGeometry,
    camera_a: &CameraKey,
    images_a: &[CalibrationImage],
    camera_b: &CameraKey,
    images_b: &[CalibrationImage],
    min_pairs: usize,
) -> Result<StereoCalibrationResult, CalibrationError> {
    check_counts(camera_a, images_a, camera_b, images_b)?;

    let template = pattern.object_points();
    let mut object_points: Vec<ObjectPoints> = Vec::new();
    let mut points_a: Vec<ImagePoints> = Vec::new();
    let mut points_b: Vec<ImagePoints> = Vec::new();
    let mut reference: Option<&CalibrationImage> = None;

    for (frame_a, frame_b) in images_a.iter().zip(images_b) {
        let found_a = detect(geometry, frame_a, pattern, camera_a);
        let found_b = detect(geometry, frame_b, pattern, camera_b);
        if let (Some(a), Some(b)) = (found_a, found_b) {
            reference.get_or_insert(frame_a);
            object_points.push(template.clone());
            points_a.push(a);
            points_b.push(b);
        }
    }

    debug!(
        usable = points_a.len(),
        total = images_a.len(),
        "Pattern detection finished"
    );

    let reference = match reference {
        Some(frame) if points_a.len() >= min_pairs => frame,
        _ => {
            return Err(CalibrationError::InsufficientPairs {
                found: points_a.len(),
                required: min_pairs,
            });
        }
    };

    let image_size = geometry
        .image_size(reference)
        .map_err(CalibrationError::geometry(CalibrationStage::PatternDetection))?;

    let calib_a = geometry
        .calibrate_camera(&object_points, &points_a, image_size)
        .map_err(CalibrationError::geometry(CalibrationStage::IntrinsicsA))?;
    let calib_b = geometry
        .calibrate_camera(&object_points, &points_b, image_size)
        .map_err(CalibrationError::geometry(CalibrationStage::IntrinsicsB))?;

    let extrinsics = geometry
        .stereo_calibrate(
            &object_points,
            &points_a,
            &points_b,
            &calib_a.intrinsics,
            &calib_b.intrinsics,
            image_size,
            StereoFlags::FIX_INTRINSIC,
        )
        .map_err(CalibrationError::geometry(CalibrationStage::StereoCalibration))?;

    let rectification = geometry
        .stereo_rectify(
            &calib_a.intrinsics,
            &calib_b.intrinsics,
            image_size,
            &extrinsics,
        )
        .map_err(CalibrationError::geometry(CalibrationStage::Rectification))?;

    Ok(StereoCalibrationResult {
        camera_a: camera_a.clone(),
        camera_b: camera_b.clone(),
        reprojection_error: extrinsics.reprojection_error,
        intrinsics_a: calib_a.intrinsics,
        intrinsics_b: calib_b.intrinsics,
        intrinsics_error_a: calib_a.reprojection_error,
        intrinsics_error_b: calib_b.reprojection_error,
        extrinsics,
        rectification,
        image_size,
        pairs_used: points_a.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CalibrationSession, SessionParams};
    use crate::testing::{FakeGeometry, blank_image, board_image};
    use contracts::PatternType;

    fn keys() -> (CameraKey, CameraKey) {
        (CameraKey::new("devA", "cam0"), CameraKey::new("devA", "cam1"))
    }

    fn store_with(a: Vec<CalibrationImage>, b: Vec<CalibrationImage>) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new());
        let (key_a, key_b) = keys();
        let mut session = CalibrationSession::new(
            "s1",
            SessionParams::new(PatternType::Chessboard, a.len().max(1), 0.5),
            vec![],
        );
        session.phase = CalibrationPhase::StereoCalibration;
        session.images.insert(key_a, a);
        session.images.insert(key_b, b);
        store.insert(session).unwrap();
        store
    }

    fn boards(n: usize) -> Vec<CalibrationImage> {
        (0..n).map(|_| board_image()).collect()
    }

    #[tokio::test]
    async fn test_successful_pair_is_stored() {
        let store = store_with(boards(12), boards(12));
        let pipeline = CalibrationPipeline::new(Arc::clone(&store), Arc::new(FakeGeometry::default()), 10);
        let (a, b) = keys();

        let result = pipeline.calibrate_stereo_pair("s1", &a, &b).await.unwrap();
        assert_eq!(result.pairs_used, 12);
        assert_eq!(result.key(), "stereo_devA_cam0_devA_cam1");

        let session = store.get("s1").unwrap();
        assert!(session.lock().results.contains_key("stereo_devA_cam0_devA_cam1"));
    }

    #[tokio::test]
    async fn test_mismatched_counts() {
        let store = store_with(boards(12), boards(11));
        let pipeline = CalibrationPipeline::new(store, Arc::new(FakeGeometry::default()), 10);
        let (a, b) = keys();
        let err = pipeline.calibrate_stereo_pair("s1", &a, &b).await.unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::MismatchedCounts { count_a: 12, count_b: 11, .. }
        ));
    }

    #[tokio::test]
    async fn test_insufficient_pairs_with_equal_counts() {
        let mut a = boards(12);
        for frame in a.iter_mut().take(4) {
            *frame = blank_image();
        }
        let store = store_with(a, boards(12));
        let pipeline = CalibrationPipeline::new(Arc::clone(&store), Arc::new(FakeGeometry::default()), 10);
        let (key_a, key_b) = keys();

        let err = pipeline
            .calibrate_stereo_pair("s1", &key_a, &key_b)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CalibrationError::InsufficientPairs {
                found: 8,
                required: 10
            }
        );
        assert!(store.get("s1").unwrap().lock().results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_camera() {
        let store = store_with(boards(12), boards(12));
        let pipeline = CalibrationPipeline::new(store, Arc::new(FakeGeometry::default()), 10);
        let (a, _) = keys();
        let ghost = CameraKey::new("devB", "cam0");
        let err = pipeline.calibrate_stereo_pair("s1", &a, &ghost).await.unwrap_err();
        assert!(matches!(err, CalibrationError::MissingImages { camera_key } if camera_key == "devB_cam0"));
    }

    #[tokio::test]
    async fn test_geometry_failure_names_stage() {
        let store = store_with(boards(12), boards(12));
        let geometry = FakeGeometry::failing(CalibrationStage::StereoCalibration);
        let pipeline = CalibrationPipeline::new(store, Arc::new(geometry), 10);
        let (a, b) = keys();
        let err = pipeline.calibrate_stereo_pair("s1", &a, &b).await.unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::Geometry { stage: CalibrationStage::StereoCalibration, .. }
        ));
    }

    #[tokio::test]
    async fn test_second_camera_intrinsics_failure() {
        let store = store_with(boards(12), boards(12));
        let geometry = FakeGeometry::failing(CalibrationStage::IntrinsicsB);
        let pipeline = CalibrationPipeline::new(store, Arc::new(geometry), 10);
        let (a, b) = keys();
        let err = pipeline.calibrate_stereo_pair("s1", &a, &b).await.unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::Geometry { stage: CalibrationStage::IntrinsicsB, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let pipeline = CalibrationPipeline::new(
            Arc::new(SessionStore::new()),
            Arc::new(FakeGeometry::default()),
            10,
        );
        let (a, b) = keys();
        assert!(matches!(
            pipeline.calibrate_stereo_pair("nope", &a, &b).await,
            Err(CalibrationError::UnknownSession { .. })
        ));
    }

    #[tokio::test]
    async fn test_calibrate_session_covers_each_pair_once() {
        let store = store_with(boards(10), boards(10));
        {
            let handle = store.get("s1").unwrap();
            handle
                .lock()
                .images
                .insert(CameraKey::new("devB", "cam0"), boards(10));
        }
        let pipeline = CalibrationPipeline::new(store, Arc::new(FakeGeometry::default()), 10);
        let outcomes = pipeline.calibrate_session("s1").await;
        let keys: Vec<&str> = outcomes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "stereo_devA_cam0_devA_cam1",
                "stereo_devA_cam0_devB_cam0",
                "stereo_devA_cam1_devB_cam0",
            ]
        );
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    }
}
