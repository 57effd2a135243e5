//! Coordinator error types

use thiserror::Error;

use contracts::{CalibrationPhase, GeometryError, SyncQuality};

/// Errors returned by session operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("unknown session '{session_id}'")]
    UnknownSession { session_id: String },

    #[error("session '{session_id}' already exists")]
    DuplicateSession { session_id: String },

    #[error("invalid session parameters: {message}")]
    InvalidParameters { message: String },

    /// Requested phase is not the immediate successor
    #[error("cannot move from phase '{from}' to '{to}'")]
    PhaseOrder {
        from: CalibrationPhase,
        to: CalibrationPhase,
    },

    #[error("session '{session_id}' is completed")]
    SessionCompleted { session_id: String },

    #[error("device '{device_id}' sync quality is {quality}")]
    SyncQualityInsufficient {
        device_id: String,
        quality: SyncQuality,
    },

    #[error("no sync statistics for device '{device_id}'")]
    SyncUnavailable { device_id: String },
}

impl SessionError {
    pub fn unknown(session_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            session_id: session_id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }
}

/// Step of the stereo pipeline that a geometry failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStage {
    PatternDetection,
    IntrinsicsA,
    IntrinsicsB,
    StereoCalibration,
    Rectification,
}

impl CalibrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternDetection => "pattern_detection",
            Self::IntrinsicsA => "intrinsics_a",
            Self::IntrinsicsB => "intrinsics_b",
            Self::StereoCalibration => "stereo_calibration",
            Self::Rectification => "rectification",
        }
    }
}

impl std::fmt::Display for CalibrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by stereo calibration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationError {
    #[error("unknown session '{session_id}'")]
    UnknownSession { session_id: String },

    #[error("session '{session_id}' is completed")]
    SessionCompleted { session_id: String },

    #[error("no images collected for camera '{camera_key}'")]
    MissingImages { camera_key: String },

    #[error(
        "image counts differ: '{camera_a}' has {count_a}, '{camera_b}' has {count_b}"
    )]
    MismatchedCounts {
        camera_a: String,
        count_a: usize,
        camera_b: String,
        count_b: usize,
    },

    #[error("insufficient usable image pairs: found {found}, need {required}")]
    InsufficientPairs { found: usize, required: usize },

    #[error("geometry failure during {stage}: {source}")]
    Geometry {
        stage: CalibrationStage,
        #[source]
        source: GeometryError,
    },

    /// The blocking worker did not return
    #[error("calibration worker failed: {message}")]
    Worker { message: String },
}

impl CalibrationError {
    pub fn geometry(stage: CalibrationStage) -> impl FnOnce(GeometryError) -> Self {
        move |source| Self::Geometry { stage, source }
    }
}

/// Service lifecycle errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service already running")]
    AlreadyRunning,

    #[error("invalid bind address '{addr}'")]
    InvalidAddress { addr: String },

    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] dispatcher::DispatcherError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
