//! ClockSynchronizer - offset tracking against one peer device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ClockSyncConfig, SyncMeasurement, SyncMethod, SyncStatistics};
use observability::RunningStats;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::history::MeasurementHistory;
use crate::{ClockPeer, ClockSource, SyncError, SystemClock};

/// Pause between exchanges of one burst
const DEFAULT_BURST_SPACING: Duration = Duration::from_millis(100);

/// Tunables taken from [`ClockSyncConfig`]
#[derive(Debug, Clone)]
pub struct SynchronizerSettings {
    pub history_capacity: usize,
    pub min_samples: usize,
    pub stats_window: Duration,
    pub burst_samples: usize,
    pub burst_spacing: Duration,
}

impl From<&ClockSyncConfig> for SynchronizerSettings {
    fn from(config: &ClockSyncConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            min_samples: config.min_samples,
            stats_window: config.stats_window(),
            burst_samples: config.burst_samples.max(1),
            burst_spacing: DEFAULT_BURST_SPACING,
        }
    }
}

impl Default for SynchronizerSettings {
    fn default() -> Self {
        Self::from(&ClockSyncConfig::default())
    }
}

#[derive(Debug)]
struct SyncState {
    history: MeasurementHistory,
    current_offset_ms: f64,
    last_sync_at: Option<f64>,
}

/// Point-in-time view of a synchronizer's counters
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub peer: String,
    pub successes: u64,
    pub failures: u64,
    pub is_synchronized: bool,
    pub current_offset_ms: f64,
    pub last_sync_at: Option<f64>,
    pub history_len: usize,
}

/// Tracks the clock offset of one peer.
///
/// Only the owner's measurement calls write the history; readers take a
/// short read lock and get owned statistics back.
pub struct ClockSynchronizer<P> {
    peer: P,
    clock: Arc<dyn ClockSource>,
    settings: SynchronizerSettings,
    state: RwLock<SyncState>,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl<P> std::fmt::Debug for ClockSynchronizer<P>
where
    P: ClockPeer + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockSynchronizer")
            .field("peer", &self.peer.label())
            .field("successes", &self.successes.load(Ordering::Relaxed))
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish()
    }
}

impl<P> ClockSynchronizer<P>
where
    P: ClockPeer + Sync,
{
    pub fn new(peer: P, settings: SynchronizerSettings) -> Self {
        Self::with_clock(peer, settings, Arc::new(SystemClock))
    }

    /// Use `clock` for the local `t1` / `t4` readings.
    pub fn with_clock(peer: P, settings: SynchronizerSettings, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            state: RwLock::new(SyncState {
                history: MeasurementHistory::new(settings.history_capacity),
                current_offset_ms: 0.0,
                last_sync_at: None,
            }),
            peer,
            clock,
            settings,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn settings(&self) -> &SynchronizerSettings {
        &self.settings
    }

    /// Take one measurement with `method` and store it on success.
    pub async fn measure_with(&self, method: SyncMethod) -> Result<SyncMeasurement, SyncError> {
        match method {
            SyncMethod::Simple => self.measure().await,
            SyncMethod::Burst => self.measure_burst().await,
        }
    }

    /// Single four-timestamp exchange.
    #[instrument(name = "clock_sync_measure", skip(self), fields(peer = %self.peer.label()))]
    pub async fn measure(&self) -> Result<SyncMeasurement, SyncError> {
        match self.sample().await {
            Ok(measurement) => {
                self.record(measurement.clone());
                Ok(measurement)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Several exchanges; keeps the minimum-RTT sample and reports the
    /// spread of the burst's offsets as its jitter.
    #[instrument(name = "clock_sync_measure_burst", skip(self), fields(peer = %self.peer.label()))]
    pub async fn measure_burst(&self) -> Result<SyncMeasurement, SyncError> {
        let attempts = self.settings.burst_samples;
        let mut taken = Vec::with_capacity(attempts);

        for i in 0..attempts {
            if i > 0 {
                tokio::time::sleep(self.settings.burst_spacing).await;
            }
            match self.sample().await {
                Ok(measurement) => taken.push(measurement),
                Err(e) => debug!(attempt = i, error = %e, "Burst exchange failed"),
            }
        }

        let spread: RunningStats = taken.iter().map(|m| m.offset_ms).collect();
        let best = taken
            .into_iter()
            .min_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms));

        let Some(mut best) = best else {
            let e = SyncError::BurstFailed { attempts };
            self.record_failure(&e);
            return Err(e);
        };
        best.jitter_ms = spread.std_dev();
        best.method = SyncMethod::Burst;

        self.record(best.clone());
        Ok(best)
    }

    async fn sample(&self) -> Result<SyncMeasurement, SyncError> {
        let t1 = self.clock.now();
        let reply = self.peer.exchange(t1).await?;
        let t4 = self.clock.now();

        if reply.t1_echo.to_bits() != t1.to_bits() {
            return Err(SyncError::EchoMismatch {
                expected: t1,
                echoed: reply.t1_echo,
            });
        }

        let previous = self.state.read().history.latest().map(|m| m.offset_ms);
        Ok(SyncMeasurement::from_timestamps(
            t1,
            reply.t2,
            reply.t3,
            t4,
            previous,
            self.peer.label(),
        ))
    }

    fn record(&self, measurement: SyncMeasurement) {
        debug!(
            peer = %self.peer.label(),
            offset_ms = measurement.offset_ms,
            rtt_ms = measurement.rtt_ms,
            jitter_ms = measurement.jitter_ms,
            method = ?measurement.method,
            "Clock measurement"
        );
        observability::record_sync_measurement(self.peer.label(), &measurement);

        let mut state = self.state.write();
        state.current_offset_ms = measurement.offset_ms;
        state.last_sync_at = Some(measurement.timestamp);
        state.history.push(measurement);
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, error: &SyncError) {
        debug!(peer = %self.peer.label(), error = %error, "Clock measurement failed");
        observability::record_sync_failure(self.peer.label());
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Statistics over the last `window`; `None` below the minimum sample count.
    pub fn statistics(&self, window: Duration) -> Option<SyncStatistics> {
        let now = self.clock.now();
        self.state
            .read()
            .history
            .statistics(now, window, self.settings.min_samples)
    }

    /// Statistics over the configured window.
    pub fn latest_statistics(&self) -> Option<SyncStatistics> {
        self.statistics(self.settings.stats_window)
    }

    pub fn is_synchronized(&self) -> bool {
        self.state.read().last_sync_at.is_some()
    }

    pub fn current_offset_ms(&self) -> f64 {
        self.state.read().current_offset_ms
    }

    /// Local time of the last stored measurement
    pub fn last_sync_at(&self) -> Option<f64> {
        self.state.read().last_sync_at
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Local time corrected by the current offset, or plain local time
    /// before the first measurement.
    pub fn synchronized_time(&self) -> f64 {
        let now = self.clock.now();
        let state = self.state.read();
        if state.last_sync_at.is_some() {
            now - state.current_offset_ms / 1000.0
        } else {
            now
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let state = self.state.read();
        SyncSnapshot {
            peer: self.peer.label().to_string(),
            successes: self.success_count(),
            failures: self.failure_count(),
            is_synchronized: state.last_sync_at.is_some(),
            current_offset_ms: state.current_offset_ms,
            last_sync_at: state.last_sync_at,
            history_len: state.history.len(),
        }
    }
}
