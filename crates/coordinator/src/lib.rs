//! # Coordinator
//!
//! Calibration session coordination for a group of capture devices.
//!
//! - `ConnectionManager`: accepts device connections and feeds the inbound queue
//! - `SessionCoordinator`: session phases, image collection, sync gating
//! - `CalibrationPipeline`: stereo calibration of camera pairs
//! - `ResponseProcessor`: the processing loop's handler for device messages
//! - `CoordinatorService`: starts and stops all of the above in order
//!
//! ## Usage
//!
//! ```ignore
//! use coordinator::{CoordinatorService, SessionParams};
//!
//! let service = CoordinatorService::builder(config).geometry(geometry).build();
//! service.start().await?;
//! service.sessions().create_session("s1", SessionParams::new(PatternType::Chessboard, 20, 0.7))?;
//! service.sessions().start_session("s1")?;
//! ```

mod connection;
mod coordinator;
mod error;
mod pipeline;
mod processor;
mod service;
mod session;

#[cfg(test)]
mod testing;

pub use connection::ConnectionManager;
pub use coordinator::{PhaseObserver, SessionCoordinator};
pub use error::{CalibrationError, CalibrationStage, CoordinatorError, SessionError};
pub use pipeline::{CalibrationPipeline, solve_pair};
pub use processor::{ImageOutcome, ResponseProcessor};
pub use service::{CoordinatorService, CoordinatorServiceBuilder};
pub use session::{
    CalibrationSession, CameraProgress, PhaseChange, SessionHandle, SessionParams,
    SessionStatusView, SessionStore,
};
