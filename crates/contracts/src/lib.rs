//! # Contracts
//!
//! Frozen interface contracts, defining inter-crate data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Wire timestamps are unix seconds (f64)
//! - Clock offsets, delays and jitter are milliseconds (f64)

mod calibration;
mod camera_key;
mod config;
mod device;
mod error;
mod geometry;
mod image;
mod message;
mod phase;
mod quality;
mod sink;
mod sync;

pub use calibration::*;
pub use camera_key::CameraKey;
pub use config::*;
pub use device::*;
pub use error::*;
pub use geometry::*;
pub use image::*;
pub use message::*;
pub use phase::*;
pub use quality::*;
pub use sink::*;
pub use sync::*;
