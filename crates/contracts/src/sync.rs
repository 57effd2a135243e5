//! Clock synchronization measurement and statistics contracts
//!
//! All durations are milliseconds; timestamps are unix seconds (f64).

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a measurement was taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    /// One four-timestamp exchange
    #[default]
    Simple,
    /// Several exchanges, minimum-RTT sample kept
    Burst,
}

/// One completed clock exchange. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeasurement {
    /// Local receive time `t4`
    pub timestamp: f64,
    pub rtt_ms: f64,
    pub offset_ms: f64,
    pub delay_ms: f64,
    pub jitter_ms: f64,
    pub method: SyncMethod,
    /// Peer label (device id or address)
    pub peer: String,
}

impl SyncMeasurement {
    /// Derive a measurement from the four exchange timestamps (seconds).
    ///
    /// `previous_offset_ms` is the offset of the last stored measurement.
    pub fn from_timestamps(
        t1: f64,
        t2: f64,
        t3: f64,
        t4: f64,
        previous_offset_ms: Option<f64>,
        peer: impl Into<String>,
    ) -> Self {
        let rtt = t4 - t1;
        let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
        let offset_ms = offset * 1000.0;
        Self {
            timestamp: t4,
            rtt_ms: rtt * 1000.0,
            offset_ms,
            delay_ms: rtt * 500.0,
            jitter_ms: previous_offset_ms.map_or(0.0, |prev| (offset_ms - prev).abs()),
            method: SyncMethod::Simple,
            peer: peer.into(),
        }
    }
}

/// Synchronization quality grade, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQuality {
    Excellent,
    Good,
    Poor,
    Unreliable,
}

impl SyncQuality {
    /// Ordered-threshold classifier over offset spread and median RTT.
    pub fn classify(std_offset_ms: f64, median_rtt_ms: f64) -> Self {
        if std_offset_ms < 5.0 && median_rtt_ms < 50.0 {
            Self::Excellent
        } else if std_offset_ms < 10.0 && median_rtt_ms < 100.0 {
            Self::Good
        } else if std_offset_ms < 20.0 && median_rtt_ms < 200.0 {
            Self::Poor
        } else {
            Self::Unreliable
        }
    }

    /// Whether a session may advance with this grade.
    pub fn is_acceptable(self) -> bool {
        matches!(self, Self::Excellent | Self::Good)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Unreliable => "unreliable",
        }
    }
}

impl fmt::Display for SyncQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary over the measurements inside one time window. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub median_offset_ms: f64,
    pub mean_offset_ms: f64,
    pub std_offset_ms: f64,
    pub min_offset_ms: f64,
    pub max_offset_ms: f64,
    pub median_rtt_ms: f64,
    /// Mean jitter
    pub jitter_ms: f64,
    pub quality: SyncQuality,
    pub sample_count: usize,
    pub window_s: f64,
}

/// Read access to per-device synchronization state.
///
/// The session coordinator consults this before letting a session advance.
pub trait SyncStatusSource: Send + Sync {
    /// Latest statistics for `device_id`, `None` when not available.
    fn sync_statistics(&self, device_id: &str) -> Option<SyncStatistics>;
}
