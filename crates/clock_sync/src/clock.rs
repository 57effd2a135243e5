//! Local time sources

use chrono::Utc;

/// Wall clock reading in unix seconds
pub trait ClockSource: Send + Sync {
    fn now(&self) -> f64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[inline]
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1e6
    }
}

/// System clock shifted by a fixed offset, used to model a drifting device
#[derive(Debug, Clone, Copy)]
pub struct OffsetClock {
    offset_s: f64,
}

impl OffsetClock {
    pub fn from_millis(offset_ms: f64) -> Self {
        Self {
            offset_s: offset_ms / 1000.0,
        }
    }
}

impl ClockSource for OffsetClock {
    #[inline]
    fn now(&self) -> f64 {
        SystemClock.now() + self.offset_s
    }
}
