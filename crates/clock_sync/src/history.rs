//! Bounded measurement history with windowed statistics.
//!
//! Backed by a heap ring buffer; pushing into a full history evicts the
//! oldest measurement.

use std::fmt;
use std::time::Duration;

use contracts::{SyncMeasurement, SyncQuality, SyncStatistics};
use observability::RunningStats;
use ringbuf::{traits::*, HeapRb};

pub struct MeasurementHistory {
    ring: HeapRb<SyncMeasurement>,
    latest: Option<SyncMeasurement>,
    evicted: u64,
}

impl fmt::Debug for MeasurementHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementHistory")
            .field("len", &self.ring.occupied_len())
            .field("capacity", &self.ring.capacity().get())
            .field("evicted", &self.evicted)
            .finish()
    }
}

impl MeasurementHistory {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            latest: None,
            evicted: 0,
        }
    }

    pub fn push(&mut self, measurement: SyncMeasurement) {
        self.latest = Some(measurement.clone());
        if self.ring.push_overwrite(measurement).is_some() {
            self.evicted += 1;
        }
    }

    pub fn latest(&self) -> Option<&SyncMeasurement> {
        self.latest.as_ref()
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Measurements dropped because the history was full
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SyncMeasurement> {
        self.ring.iter()
    }

    /// Statistics over measurements taken at or after `now - window`.
    ///
    /// `None` when fewer than `min_samples` fall inside the window.
    pub fn statistics(
        &self,
        now: f64,
        window: Duration,
        min_samples: usize,
    ) -> Option<SyncStatistics> {
        let cutoff = now - window.as_secs_f64();
        let recent: Vec<&SyncMeasurement> =
            self.ring.iter().filter(|m| m.timestamp >= cutoff).collect();

        if recent.is_empty() || recent.len() < min_samples {
            return None;
        }

        let offsets: RunningStats = recent.iter().map(|m| m.offset_ms).collect();
        let jitter: RunningStats = recent.iter().map(|m| m.jitter_ms).collect();
        let median_offset_ms = median(recent.iter().map(|m| m.offset_ms).collect());
        let median_rtt_ms = median(recent.iter().map(|m| m.rtt_ms).collect());
        let std_offset_ms = offsets.std_dev();

        Some(SyncStatistics {
            median_offset_ms,
            mean_offset_ms: offsets.mean(),
            std_offset_ms,
            min_offset_ms: offsets.min(),
            max_offset_ms: offsets.max(),
            median_rtt_ms,
            jitter_ms: jitter.mean(),
            quality: SyncQuality::classify(std_offset_ms, median_rtt_ms),
            sample_count: recent.len(),
            window_s: window.as_secs_f64(),
        })
    }
}

/// Median of a non-empty sample; mean of the middle pair for even counts.
fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use contracts::SyncMethod;

    fn sample(timestamp: f64, offset_ms: f64, rtt_ms: f64) -> SyncMeasurement {
        SyncMeasurement {
            timestamp,
            rtt_ms,
            offset_ms,
            delay_ms: rtt_ms / 2.0,
            jitter_ms: 0.5,
            method: SyncMethod::Simple,
            peer: "test".into(),
        }
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut history = MeasurementHistory::new(3);
        for i in 0..5 {
            history.push(sample(i as f64, i as f64, 1.0));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.evicted(), 2);
        let offsets: Vec<f64> = history.iter().map(|m| m.offset_ms).collect();
        assert_eq!(offsets, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().map(|m| m.offset_ms), Some(4.0));
    }

    #[test]
    fn test_statistics_unavailable_below_min_samples() {
        let mut history = MeasurementHistory::new(10);
        assert!(history
            .statistics(100.0, Duration::from_secs(60), 2)
            .is_none());
        history.push(sample(100.0, 5.0, 1.0));
        assert!(history
            .statistics(100.0, Duration::from_secs(60), 2)
            .is_none());
        // min_samples of zero still never divides by zero on an empty window
        assert!(MeasurementHistory::new(4)
            .statistics(0.0, Duration::from_secs(1), 0)
            .is_none());
    }

    #[test]
    fn test_window_filters_old_samples() {
        let mut history = MeasurementHistory::new(10);
        history.push(sample(10.0, 500.0, 1.0));
        history.push(sample(95.0, 4.0, 2.0));
        history.push(sample(99.0, 6.0, 4.0));

        let stats = history
            .statistics(100.0, Duration::from_secs(30), 2)
            .unwrap();
        assert_eq!(stats.sample_count, 2);
        assert_relative_eq!(stats.median_offset_ms, 5.0);
        assert_relative_eq!(stats.median_rtt_ms, 3.0);
        assert_relative_eq!(stats.min_offset_ms, 4.0);
        assert_relative_eq!(stats.max_offset_ms, 6.0);
        assert_relative_eq!(stats.std_offset_ms, 2.0f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(stats.jitter_ms, 0.5);
        assert_eq!(stats.quality, SyncQuality::Excellent);
        assert_eq!(stats.window_s, 30.0);
    }

    #[test]
    fn test_quality_degrades_with_spread() {
        let mut history = MeasurementHistory::new(10);
        for (i, offset) in [0.0, 30.0, -30.0, 40.0].into_iter().enumerate() {
            history.push(sample(i as f64, offset, 5.0));
        }
        let stats = history.statistics(4.0, Duration::from_secs(60), 2).unwrap();
        assert_eq!(stats.quality, SyncQuality::Unreliable);
    }

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
