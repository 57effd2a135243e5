//! Calibration session state and the shared session table

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use contracts::{
    CalibrationImage, CalibrationPhase, CameraKey, Device, PatternType, SessionConfig,
    StereoCalibrationResult,
};

use crate::error::SessionError;

/// Parameters supplied when a session is created
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub pattern_type: PatternType,
    pub target_images: usize,
    pub quality_threshold: f64,
}

impl SessionParams {
    pub fn new(pattern_type: PatternType, target_images: usize, quality_threshold: f64) -> Self {
        Self {
            pattern_type,
            target_images,
            quality_threshold,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            PatternType::default(),
            config.default_target_images,
            config.default_quality_threshold,
        )
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.target_images == 0 {
            return Err(SessionError::invalid("target images per camera must be positive"));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(SessionError::invalid(format!(
                "quality threshold {} outside [0, 1]",
                self.quality_threshold
            )));
        }
        Ok(())
    }
}

/// A phase a session has entered. `from` is `None` on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub session_id: String,
    pub from: Option<CalibrationPhase>,
    pub to: CalibrationPhase,
}

/// One calibration run across the devices present at creation time.
#[derive(Debug)]
pub struct CalibrationSession {
    pub session_id: String,
    pub params: SessionParams,
    pub devices: Vec<Device>,
    pub phase: CalibrationPhase,
    pub created_at: DateTime<Utc>,

    /// Accepted images per camera, in arrival order. A key appears on the
    /// first submission for that camera, even when the image is rejected.
    pub images: BTreeMap<CameraKey, Vec<CalibrationImage>>,

    pub results: BTreeMap<String, StereoCalibrationResult>,

    /// Phase changes not yet delivered to observers, oldest first
    outbox: VecDeque<PhaseChange>,
    delivering: bool,
}

impl CalibrationSession {
    pub fn new(session_id: impl Into<String>, params: SessionParams, devices: Vec<Device>) -> Self {
        Self {
            session_id: session_id.into(),
            params,
            devices,
            phase: CalibrationPhase::Initialization,
            created_at: Utc::now(),
            images: BTreeMap::new(),
            results: BTreeMap::new(),
            outbox: VecDeque::new(),
            delivering: false,
        }
    }

    /// Set the phase and queue the change for delivery.
    pub(crate) fn enter(&mut self, to: CalibrationPhase) {
        let from = self.phase;
        self.phase = to;
        self.outbox.push_back(PhaseChange {
            session_id: self.session_id.clone(),
            from: Some(from),
            to,
        });
    }

    pub(crate) fn queue_created(&mut self) {
        self.outbox.push_back(PhaseChange {
            session_id: self.session_id.clone(),
            from: None,
            to: self.phase,
        });
    }

    /// Claim delivery of the outbox. `false` while another caller holds it.
    pub(crate) fn begin_delivery(&mut self) -> bool {
        if self.delivering {
            return false;
        }
        self.delivering = true;
        true
    }

    /// Next change to deliver; releases the claim once the outbox is empty.
    pub(crate) fn next_delivery(&mut self) -> Option<PhaseChange> {
        let next = self.outbox.pop_front();
        if next.is_none() {
            self.delivering = false;
        }
        next
    }

    pub fn collected(&self, key: &CameraKey) -> usize {
        self.images.get(key).map_or(0, Vec::len)
    }

    /// Every tracked camera has reached the target.
    pub fn collection_complete(&self) -> bool {
        !self.images.is_empty()
            && self
                .images
                .values()
                .all(|images| images.len() >= self.params.target_images)
    }

    /// Declared cameras over all devices in the session
    pub fn expected_cameras(&self) -> usize {
        self.devices.iter().map(|d| d.cameras.len()).sum()
    }

    pub fn status(&self) -> SessionStatusView {
        let target = self.params.target_images;
        let cameras = self
            .images
            .iter()
            .map(|(key, images)| CameraProgress {
                camera_key: key.clone(),
                collected: images.len(),
                target,
                progress: (images.len() as f64 / target as f64).min(1.0),
            })
            .collect();

        let expected = self.expected_cameras().max(1);
        let overall_progress = (self.images.len() as f64 / expected as f64).min(1.0);

        SessionStatusView {
            session_id: self.session_id.clone(),
            phase: self.phase,
            pattern_type: self.params.pattern_type,
            elapsed_s: (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0,
            device_count: self.devices.len(),
            camera_count: self.expected_cameras(),
            cameras,
            results: self.results.keys().cloned().collect(),
            overall_progress,
        }
    }
}

/// Collection progress for one camera
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraProgress {
    pub camera_key: CameraKey,
    pub collected: usize,
    pub target: usize,
    pub progress: f64,
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusView {
    pub session_id: String,
    pub phase: CalibrationPhase,
    pub pattern_type: PatternType,
    pub elapsed_s: f64,
    pub device_count: usize,
    pub camera_count: usize,
    pub cameras: Vec<CameraProgress>,
    /// Keys of computed calibration results
    pub results: Vec<String>,
    pub overall_progress: f64,
}

pub type SessionHandle = Arc<Mutex<CalibrationSession>>;

/// Session table. Each session sits behind its own lock so sessions never
/// contend with each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: CalibrationSession) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.session_id) {
            return Err(SessionError::DuplicateSession {
                session_id: session.session_id,
            });
        }
        let id = session.session_id.clone();
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
