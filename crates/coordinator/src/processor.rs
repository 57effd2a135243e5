//! ResponseProcessor - handles queued device messages on the processing loop

use std::sync::Arc;

use tracing::{debug, info, warn};

use contracts::{CalibrationResponse, ImageSubmission, QualityAssessor, ResponseKind};
use dispatcher::{Inbound, InboundHandler};

use crate::coordinator::SessionCoordinator;

/// What became of one image submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Accepted,
    Rejected,
    /// Payload could not be decoded or the session refused it
    Dropped(String),
}

pub struct ResponseProcessor {
    sessions: Arc<SessionCoordinator>,
    assessor: Option<Arc<dyn QualityAssessor>>,
}

impl ResponseProcessor {
    pub fn new(sessions: Arc<SessionCoordinator>) -> Self {
        Self {
            sessions,
            assessor: None,
        }
    }

    /// Score images locally instead of trusting the device's verdict.
    pub fn with_assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    pub fn process_image(&self, submission: ImageSubmission) -> ImageOutcome {
        let image = match submission.decode_image() {
            Ok(image) => image,
            Err(e) => {
                warn!(device_id = %submission.device_id, error = %e, "Image payload dropped");
                return ImageOutcome::Dropped(e.to_string());
            }
        };

        let quality = match (&self.assessor, self.sessions.pattern_type(&submission.session_id)) {
            (Some(assessor), Some(pattern)) => assessor.assess(&image, pattern),
            _ => submission.quality_result.clone(),
        };

        match self.sessions.add_image(
            &submission.session_id,
            &submission.device_id,
            &submission.camera_id,
            image,
            &quality,
        ) {
            Ok(true) => ImageOutcome::Accepted,
            Ok(false) => ImageOutcome::Rejected,
            Err(e) => {
                warn!(
                    session_id = %submission.session_id,
                    device_id = %submission.device_id,
                    error = %e,
                    "Image submission refused"
                );
                ImageOutcome::Dropped(e.to_string())
            }
        }
    }

    pub fn process_response(&self, response: &CalibrationResponse) {
        if !response.success {
            warn!(
                session_id = %response.session_id,
                device_id = %response.device_id,
                kind = ?response.response_type,
                error = response.error_message.as_deref().unwrap_or("unspecified"),
                "Device reported failure"
            );
            return;
        }

        match &response.response_type {
            ResponseKind::CalibrationStarted => info!(
                session_id = %response.session_id,
                device_id = %response.device_id,
                "Device started calibration"
            ),
            ResponseKind::ImageCaptured => debug!(
                session_id = %response.session_id,
                device_id = %response.device_id,
                "Device captured image"
            ),
            ResponseKind::CalibrationCompleted => info!(
                session_id = %response.session_id,
                device_id = %response.device_id,
                "Device completed calibration"
            ),
            ResponseKind::Other(kind) => debug!(
                session_id = %response.session_id,
                device_id = %response.device_id,
                kind = %kind,
                "Unhandled response kind"
            ),
        }
    }
}

impl InboundHandler for ResponseProcessor {
    async fn handle(&self, item: Inbound) {
        match item {
            Inbound::Response(response) => self.process_response(&response),
            Inbound::Image(submission) => {
                self.process_image(submission);
            }
        }
    }
}
