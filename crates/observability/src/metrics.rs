//! Coordinator metrics
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! every call is a no-op.

use contracts::{CalibrationPhase, SyncMeasurement, SyncQuality};
use metrics::{counter, gauge, histogram};

/// Record one successful clock exchange
pub fn record_sync_measurement(device_id: &str, measurement: &SyncMeasurement) {
    counter!(
        "calib_coord_sync_measurements_total",
        "device_id" => device_id.to_string()
    )
    .increment(1);

    gauge!(
        "calib_coord_clock_offset_ms",
        "device_id" => device_id.to_string()
    )
    .set(measurement.offset_ms);

    histogram!(
        "calib_coord_sync_rtt_ms",
        "device_id" => device_id.to_string()
    )
    .record(measurement.rtt_ms);

    histogram!(
        "calib_coord_sync_jitter_ms",
        "device_id" => device_id.to_string()
    )
    .record(measurement.jitter_ms);
}

/// Record a failed or timed-out clock exchange
pub fn record_sync_failure(device_id: &str) {
    counter!(
        "calib_coord_sync_failures_total",
        "device_id" => device_id.to_string()
    )
    .increment(1);
}

/// Record the current quality grade (0 = excellent .. 3 = unreliable)
pub fn record_sync_quality(device_id: &str, quality: SyncQuality) {
    let level = match quality {
        SyncQuality::Excellent => 0.0,
        SyncQuality::Good => 1.0,
        SyncQuality::Poor => 2.0,
        SyncQuality::Unreliable => 3.0,
    };
    gauge!(
        "calib_coord_sync_quality",
        "device_id" => device_id.to_string()
    )
    .set(level);
}

/// Record an image submission outcome
pub fn record_image_submission(camera_key: &str, accepted: bool) {
    let status = if accepted { "accepted" } else { "rejected" };
    counter!(
        "calib_coord_images_total",
        "camera_key" => camera_key.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a session entering `phase`
pub fn record_phase_transition(phase: CalibrationPhase) {
    counter!(
        "calib_coord_phase_transitions_total",
        "phase" => phase.as_str()
    )
    .increment(1);
}

/// Record a stereo calibration attempt
pub fn record_stereo_calibration(pair_key: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "calib_coord_stereo_calibrations_total",
        "pair" => pair_key.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a connection lifecycle event (`accepted`, `registered`,
/// `disconnected`, `malformed`, `oversized`)
pub fn record_connection_event(kind: &'static str) {
    counter!("calib_coord_connection_events_total", "kind" => kind).increment(1);
}

/// Record the outcome of one outbound command (`sent`, `dropped` or a
/// failure reason such as `timeout`)
pub fn record_command_delivery(command: &'static str, outcome: &'static str) {
    counter!(
        "calib_coord_commands_total",
        "command" => command,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the number of currently connected devices
pub fn record_connected_devices(count: usize) {
    gauge!("calib_coord_connected_devices").set(count as f64);
}

/// Online statistics (Welford's algorithm, sample variance)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance (n - 1); 0 below two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::default();
        for value in iter {
            stats.push(value);
        }
        stats
    }
}
