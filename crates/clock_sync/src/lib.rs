//! # Clock Sync
//!
//! Round-trip clock synchronization between the coordinator and its devices.
//!
//! Responsibilities:
//! - Four-timestamp exchange over UDP (`UdpClockPeer`)
//! - Offset / delay / jitter tracking with bounded history (`ClockSynchronizer`)
//! - Windowed statistics and quality grading
//! - Device-side responder (`ClockResponder`)
//! - Periodic measurement of all connected devices (`SyncScheduler`)
//!
//! ## Usage
//!
//! ```ignore
//! use clock_sync::{ClockSynchronizer, SynchronizerSettings, UdpClockPeer};
//!
//! let peer = UdpClockPeer::new("devA", "10.0.0.5:8123".parse()?, Duration::from_secs(5));
//! let sync = ClockSynchronizer::new(peer, SynchronizerSettings::default());
//! sync.measure().await?;
//! if let Some(stats) = sync.latest_statistics() {
//!     println!("offset {:.2} ms ({})", stats.median_offset_ms, stats.quality);
//! }
//! ```

mod clock;
mod error;
mod history;
mod peer;
mod responder;
mod scheduler;
mod synchronizer;
pub mod wire;

pub use clock::{ClockSource, OffsetClock, SystemClock};
pub use error::SyncError;
pub use history::MeasurementHistory;
pub use peer::{ClockPeer, LocalClockPeer, UdpClockPeer};
pub use responder::ClockResponder;
pub use scheduler::{DeviceSynchronizer, SyncScheduler, TickReport};
pub use synchronizer::{ClockSynchronizer, SyncSnapshot, SynchronizerSettings};

pub use contracts::{SyncMeasurement, SyncMethod, SyncQuality, SyncStatistics};
