//! SessionCoordinator - session lifecycle, image collection and phase control

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use contracts::{
    CalibrationCommand, CalibrationImage, CalibrationPhase, CameraKey, CommandKind,
    ObserverResult, PatternType, QualityResult, SessionConfig, SyncStatusSource,
};
use dispatcher::{BroadcastReport, CommandDispatcher};

use crate::error::SessionError;
use crate::pipeline::CalibrationPipeline;
use crate::session::{
    CalibrationSession, PhaseChange, SessionHandle, SessionParams, SessionStatusView,
    SessionStore,
};

pub type PhaseObserver = Arc<dyn Fn(&PhaseChange) -> ObserverResult + Send + Sync>;

/// Owns every calibration session.
///
/// Each session is mutated under its own lock; observers and broadcasts run
/// after the lock is released. Phase changes are queued on the session while
/// it is locked and handed to observers strictly in that order.
pub struct SessionCoordinator {
    config: SessionConfig,
    sessions: Arc<SessionStore>,
    dispatcher: Arc<CommandDispatcher>,
    sync: Arc<dyn SyncStatusSource>,
    pipeline: Option<Arc<CalibrationPipeline>>,
    observers: RwLock<Vec<PhaseObserver>>,
    calibrations: TaskTracker,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        sessions: Arc<SessionStore>,
        dispatcher: Arc<CommandDispatcher>,
        sync: Arc<dyn SyncStatusSource>,
    ) -> Self {
        let coordinator = Self {
            config,
            sessions,
            dispatcher: Arc::clone(&dispatcher),
            sync,
            pipeline: None,
            observers: RwLock::new(Vec::new()),
            calibrations: TaskTracker::new(),
        };
        coordinator.add_observer(move |change: &PhaseChange| {
            let command = CalibrationCommand::new(CommandKind::PhaseChanged, &change.session_id)
                .with_param("phase", change.to.as_str())
                .with_param("previous_phase", change.from.map(|p| p.as_str()));
            dispatcher.broadcast(&command);
            Ok(())
        });
        coordinator
    }

    /// Pipeline used for automatic stereo calibration.
    pub fn with_pipeline(mut self, pipeline: Arc<CalibrationPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn pipeline(&self) -> Option<&Arc<CalibrationPipeline>> {
        self.pipeline.as_ref()
    }

    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&PhaseChange) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    fn notify(&self, change: &PhaseChange) {
        observability::metrics::record_phase_transition(change.to);
        info!(
            session_id = %change.session_id,
            from = ?change.from,
            to = %change.to,
            "Session phase changed"
        );
        let observers: Vec<PhaseObserver> = self.observers.read().clone();
        for observer in observers {
            if let Err(e) = observer(change) {
                warn!(session_id = %change.session_id, error = %e, "Phase observer failed");
            }
        }
    }

    /// Hand queued phase changes to the observers.
    ///
    /// Only one caller delivers for a session at a time. A caller that finds
    /// delivery in progress returns at once and its changes go out after the
    /// ones already queued.
    fn deliver(&self, handle: &SessionHandle) {
        if !handle.lock().begin_delivery() {
            return;
        }
        loop {
            let next = handle.lock().next_delivery();
            match next {
                Some(change) => self.notify(&change),
                None => return,
            }
        }
    }

    fn session(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| SessionError::unknown(session_id))
    }

    /// Create a session over the devices connected right now.
    #[instrument(name = "session_create", skip(self, params))]
    pub fn create_session(&self, session_id: &str, params: SessionParams) -> Result<(), SessionError> {
        params.validate()?;
        let devices = self.dispatcher.registry().connected_devices();
        let device_count = devices.len();
        let mut session = CalibrationSession::new(session_id, params, devices);
        session.queue_created();
        let handle = self.sessions.insert(session)?;

        info!(devices = device_count, "Session created");
        self.deliver(&handle);
        Ok(())
    }

    /// Move to pattern detection and tell devices to start capturing.
    #[instrument(name = "session_start", skip(self))]
    pub fn start_session(&self, session_id: &str) -> Result<BroadcastReport, SessionError> {
        let handle = self.session(session_id)?;
        let command = {
            let mut session = handle.lock();
            let to = CalibrationPhase::PatternDetection;
            self.check_transition(&session, to)?;
            session.enter(to);

            CalibrationCommand::new(CommandKind::StartCalibration, session_id)
                .with_param("pattern_type", session.params.pattern_type.as_str())
                .with_param("target_images", session.params.target_images as u64)
                .with_param("quality_threshold", session.params.quality_threshold)
        };

        let report = self.dispatcher.broadcast(&command);
        self.deliver(&handle);
        Ok(report)
    }

    /// Move a session to the immediate successor of its current phase.
    #[instrument(name = "session_advance", skip(self))]
    pub fn advance_phase(&self, session_id: &str, to: CalibrationPhase) -> Result<(), SessionError> {
        let handle = self.session(session_id)?;
        {
            let mut session = handle.lock();
            self.check_transition(&session, to)?;
            session.enter(to);
        }
        self.deliver(&handle);

        // images may have arrived before collection officially began
        if to == CalibrationPhase::DataCollection {
            self.check_collection_progress(session_id)?;
        }
        Ok(())
    }

    fn check_transition(
        &self,
        session: &CalibrationSession,
        to: CalibrationPhase,
    ) -> Result<(), SessionError> {
        if session.phase.is_terminal() {
            return Err(SessionError::SessionCompleted {
                session_id: session.session_id.clone(),
            });
        }
        if session.phase.next() != Some(to) {
            return Err(SessionError::PhaseOrder {
                from: session.phase,
                to,
            });
        }
        self.check_sync(session)
    }

    /// Refuse while any connected session device is poorly synchronized.
    fn check_sync(&self, session: &CalibrationSession) -> Result<(), SessionError> {
        if !self.config.require_sync_quality {
            return Ok(());
        }
        let registry = self.dispatcher.registry();
        for device in &session.devices {
            let connected = registry
                .get(&device.device_id)
                .is_some_and(|d| d.is_connected());
            if !connected {
                continue;
            }
            match self.sync.sync_statistics(&device.device_id) {
                None => {
                    return Err(SessionError::SyncUnavailable {
                        device_id: device.device_id.clone(),
                    });
                }
                Some(stats) if !stats.quality.is_acceptable() => {
                    return Err(SessionError::SyncQualityInsufficient {
                        device_id: device.device_id.clone(),
                        quality: stats.quality,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Record a submitted image. Returns whether it was accepted.
    ///
    /// Images scoring below the session threshold are rejected without
    /// being stored; that is not an error.
    #[instrument(name = "session_add_image", skip(self, image, quality))]
    pub fn add_image(
        &self,
        session_id: &str,
        device_id: &str,
        camera_id: &str,
        image: CalibrationImage,
        quality: &QualityResult,
    ) -> Result<bool, SessionError> {
        let handle = self.session(session_id)?;
        let key = CameraKey::new(device_id, camera_id);

        let (accepted, collected, completed) = {
            let mut session = handle.lock();
            if session.phase.is_terminal() {
                return Err(SessionError::SessionCompleted {
                    session_id: session_id.to_string(),
                });
            }
            let threshold = session.params.quality_threshold;
            let images = session.images.entry(key.clone()).or_default();
            let accepted = quality.passes(threshold);
            if accepted {
                images.push(image);
            }
            let collected = images.len();
            let completed = accepted && auto_transition(&mut session);
            (accepted, collected, completed)
        };

        observability::metrics::record_image_submission(&key, accepted);
        if accepted {
            debug!(camera = %key, collected, "Image accepted");
        } else {
            info!(
                camera = %key,
                score = quality.overall_score,
                "Image rejected: quality below threshold"
            );
        }

        if completed {
            self.on_collection_complete(&handle, session_id);
        }
        Ok(accepted)
    }

    /// Advance to stereo calibration once every tracked camera has its
    /// images. Returns whether the transition fired; repeated calls do not
    /// fire it again.
    pub fn check_collection_progress(&self, session_id: &str) -> Result<bool, SessionError> {
        let handle = self.session(session_id)?;
        let completed = auto_transition(&mut handle.lock());
        if completed {
            self.on_collection_complete(&handle, session_id);
        }
        Ok(completed)
    }

    fn on_collection_complete(&self, handle: &SessionHandle, session_id: &str) {
        self.deliver(handle);

        if !self.config.auto_calibrate {
            return;
        }
        let Some(pipeline) = self.pipeline.clone() else {
            debug!(session_id, "No calibration pipeline configured");
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(session_id, "No runtime, automatic calibration skipped");
            return;
        }

        let session_id = session_id.to_string();
        self.calibrations.spawn(async move {
            let outcomes = pipeline.calibrate_session(&session_id).await;
            let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
            info!(
                session_id = %session_id,
                pairs = outcomes.len(),
                succeeded,
                "Automatic stereo calibration finished"
            );
        });
    }

    /// Wait for automatic calibrations started so far.
    pub async fn wait_calibrations(&self) {
        self.calibrations.close();
        self.calibrations.wait().await;
        self.calibrations.reopen();
    }

    pub fn status(&self, session_id: &str) -> Result<SessionStatusView, SessionError> {
        Ok(self.session(session_id)?.lock().status())
    }

    pub fn pattern_type(&self, session_id: &str) -> Option<PatternType> {
        self.sessions
            .get(session_id)
            .map(|h| h.lock().params.pattern_type)
    }

    pub fn phase(&self, session_id: &str) -> Option<CalibrationPhase> {
        self.sessions.get(session_id).map(|h| h.lock().phase)
    }
}

/// Enter stereo calibration once collection is complete. Returns whether
/// the transition fired.
fn auto_transition(session: &mut CalibrationSession) -> bool {
    if session.phase != CalibrationPhase::DataCollection || !session.collection_complete() {
        return false;
    }
    session.enter(CalibrationPhase::StereoCalibration);
    true
}
