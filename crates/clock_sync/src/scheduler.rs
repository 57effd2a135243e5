//! SyncScheduler - one background task measuring every connected device.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use contracts::{ClockSyncConfig, Device, SyncStatistics, SyncStatusSource};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{ClockSource, ClockSynchronizer, SynchronizerSettings, SystemClock, UdpClockPeer};

pub type DeviceSynchronizer = ClockSynchronizer<UdpClockPeer>;

struct DeviceClock {
    synchronizer: Arc<DeviceSynchronizer>,
    active: bool,
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub measured: usize,
    pub failed: usize,
}

pub struct SyncScheduler {
    config: ClockSyncConfig,
    clock: Arc<dyn ClockSource>,
    devices: RwLock<HashMap<String, DeviceClock>>,
}

impl SyncScheduler {
    pub fn new(config: ClockSyncConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ClockSyncConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Start (or resume) measuring `device` at its address and the configured port.
    ///
    /// History is kept when a device reconnects from the same address.
    pub fn register_device(&self, device: &Device) {
        let target = SocketAddr::new(device.address.ip(), self.config.port);
        self.register(&device.device_id, target);
    }

    pub fn register(&self, device_id: &str, target: SocketAddr) {
        let mut devices = self.devices.write();
        if let Some(entry) = devices.get_mut(device_id) {
            if entry.synchronizer.peer().target() == target {
                entry.active = true;
                debug!(device_id, %target, "Clock sync resumed");
                return;
            }
        }

        let peer = UdpClockPeer::new(device_id, target, self.config.timeout());
        let synchronizer = ClockSynchronizer::with_clock(
            peer,
            SynchronizerSettings::from(&self.config),
            self.clock.clone(),
        );
        devices.insert(
            device_id.to_string(),
            DeviceClock {
                synchronizer: Arc::new(synchronizer),
                active: true,
            },
        );
        info!(device_id, %target, "Clock sync registered");
    }

    /// Stop measuring `device_id`; its history stays readable.
    pub fn deactivate(&self, device_id: &str) {
        if let Some(entry) = self.devices.write().get_mut(device_id) {
            entry.active = false;
            debug!(device_id, "Clock sync paused");
        }
    }

    pub fn synchronizer(&self, device_id: &str) -> Option<Arc<DeviceSynchronizer>> {
        self.devices
            .read()
            .get(device_id)
            .map(|entry| entry.synchronizer.clone())
    }

    pub fn active_devices(&self) -> Vec<(String, Arc<DeviceSynchronizer>)> {
        self.devices
            .read()
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(id, entry)| (id.clone(), entry.synchronizer.clone()))
            .collect()
    }

    /// Measure every active device once, concurrently.
    #[instrument(name = "sync_scheduler_tick", skip(self))]
    pub async fn tick(&self) -> TickReport {
        let devices = self.active_devices();
        let method = self.config.method;

        let outcomes = join_all(devices.iter().map(|(device_id, sync)| async move {
            match sync.measure_with(method).await {
                Ok(_) => {
                    if let Some(stats) = sync.latest_statistics() {
                        observability::record_sync_quality(device_id, stats.quality);
                    }
                    true
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Clock sync failed");
                    false
                }
            }
        }))
        .await;

        let measured = outcomes.iter().filter(|ok| **ok).count();
        TickReport {
            measured,
            failed: outcomes.len() - measured,
        }
    }

    /// Tick at the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.interval_ms, "Clock sync scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        report = self.tick() => {
                            debug!(measured = report.measured, failed = report.failed, "Clock sync tick");
                        }
                    }
                }
            }
        }

        info!("Clock sync scheduler stopped");
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    }
}

impl SyncStatusSource for SyncScheduler {
    fn sync_statistics(&self, device_id: &str) -> Option<SyncStatistics> {
        self.synchronizer(device_id)?.latest_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClockResponder, OffsetClock};
    use std::time::Duration;

    fn fast_config(port: u16) -> ClockSyncConfig {
        ClockSyncConfig {
            port,
            interval_ms: 1000,
            timeout_ms: 500,
            ..ClockSyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_tick_measures_active_devices_only() {
        let responder = Arc::new(
            ClockResponder::bind(
                "127.0.0.1:0".parse().unwrap(),
                Arc::new(OffsetClock::from_millis(30.0)),
            )
            .await
            .unwrap(),
        );
        let addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serving = responder.clone();
        let token = cancel.clone();
        tokio::spawn(async move { serving.run(token).await });

        let scheduler = SyncScheduler::new(fast_config(addr.port()));
        scheduler.register("devA", addr);
        scheduler.register("devB", addr);
        scheduler.deactivate("devB");

        for _ in 0..3 {
            let report = scheduler.tick().await;
            assert_eq!(report, TickReport { measured: 1, failed: 0 });
        }

        let stats = scheduler.sync_statistics("devA").unwrap();
        assert_eq!(stats.sample_count, 3);
        assert!(scheduler.sync_statistics("devB").is_none());
        assert!(scheduler.sync_statistics("unknown").is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_reregistration_keeps_history() {
        let scheduler = SyncScheduler::new(fast_config(9));
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        scheduler.register("devA", addr);
        let first = scheduler.synchronizer("devA").unwrap();
        scheduler.deactivate("devA");
        assert!(scheduler.active_devices().is_empty());

        scheduler.register("devA", addr);
        let second = scheduler.synchronizer("devA").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scheduler.active_devices().len(), 1);

        scheduler.register("devA", "127.0.0.2:9".parse().unwrap());
        let third = scheduler.synchronizer("devA").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let scheduler = Arc::new(SyncScheduler::new(fast_config(9)));
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
