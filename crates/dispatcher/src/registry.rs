//! DeviceRegistry - the device table and the live outbound link per device

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{CalibrationCommand, CommandSink, Device, DeviceStatus, ObserverResult};

use crate::error::DispatcherError;
use crate::link::{ConnectionId, DeviceLink};
use crate::metrics::LinkSnapshot;

/// Callback fired after a device registers.
pub type DeviceObserver = Arc<dyn Fn(&Device) -> ObserverResult + Send + Sync>;

/// Devices are never removed; a disconnect only flips the status.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
    links: RwLock<HashMap<String, DeviceLink>>,
    observers: RwLock<Vec<DeviceObserver>>,
    next_connection: AtomicU64,
    link_capacity: usize,
}

impl DeviceRegistry {
    pub fn new(link_capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_connection: AtomicU64::new(1),
            link_capacity,
        }
    }

    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&Device) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Install `device` as connected and attach `sink` as its outbound link.
    ///
    /// Returns the id of the new connection and the link it replaced, if the
    /// device was already connected. The caller owns shutting the old link down.
    #[instrument(name = "registry_register", skip(self, device, sink), fields(device_id = %device.device_id))]
    pub fn register<S>(&self, mut device: Device, sink: S) -> (ConnectionId, Option<DeviceLink>)
    where
        S: CommandSink + Send + 'static,
    {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let link = DeviceLink::spawn(
            device.device_id.clone(),
            connection_id,
            sink,
            self.link_capacity,
        );

        device.status = DeviceStatus::Connected;
        device.last_seen = Utc::now();
        let snapshot = device.clone();

        let replaced = self.links.write().insert(device.device_id.clone(), link);
        self.devices
            .write()
            .insert(device.device_id.clone(), device);

        if replaced.is_some() {
            warn!(connection_id, "Device re-registered, previous link replaced");
        }
        info!(
            connection_id,
            address = %snapshot.address,
            cameras = snapshot.cameras.len(),
            "Device registered"
        );
        observability::metrics::record_connection_event("registered");
        self.record_connected();

        self.notify(&snapshot);
        (connection_id, replaced)
    }

    fn notify(&self, device: &Device) {
        let observers: Vec<DeviceObserver> = self.observers.read().clone();
        for observer in observers {
            if let Err(e) = observer(device) {
                warn!(device_id = %device.device_id, error = %e, "Device observer failed");
            }
        }
    }

    /// Mark the device disconnected if `connection_id` still owns its link.
    ///
    /// Returns the removed link, or `None` when a newer connection has taken over.
    #[instrument(name = "registry_disconnect", skip(self))]
    pub fn disconnect(&self, device_id: &str, connection_id: ConnectionId) -> Option<DeviceLink> {
        let link = {
            let mut links = self.links.write();
            match links.get(device_id) {
                Some(link) if link.connection_id() == connection_id => links.remove(device_id),
                _ => None,
            }
        };

        if link.is_none() {
            debug!("Stale disconnect ignored");
            return None;
        }

        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.status = DeviceStatus::Disconnected;
            device.last_seen = Utc::now();
        }
        info!("Device disconnected");
        observability::metrics::record_connection_event("disconnected");
        self.record_connected();
        link
    }

    /// Refresh `last_seen` for a device.
    pub fn touch(&self, device_id: &str) {
        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.last_seen = Utc::now();
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().get(device_id).cloned()
    }

    /// All known devices, sorted by id.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        self.devices()
            .into_iter()
            .filter(Device::is_connected)
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.links.read().len()
    }

    /// Ids of devices that currently hold a link.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Queue `command` on one device's link.
    pub fn send_to(&self, device_id: &str, command: CalibrationCommand) -> Result<(), DispatcherError> {
        match self.links.read().get(device_id) {
            Some(link) => link.try_send(command),
            None => Err(DispatcherError::NotConnected {
                device_id: device_id.to_string(),
            }),
        }
    }

    /// Token cancelled when the link installed by `connection_id` can no
    /// longer write. `None` once that connection no longer owns the link.
    pub fn link_lost(&self, device_id: &str, connection_id: ConnectionId) -> Option<CancellationToken> {
        match self.links.read().get(device_id) {
            Some(link) if link.connection_id() == connection_id => Some(link.lost()),
            _ => None,
        }
    }

    /// Delivery counters of every live link, sorted by device id.
    pub fn link_metrics(&self) -> Vec<(String, LinkSnapshot)> {
        let mut out: Vec<(String, LinkSnapshot)> = self
            .links
            .read()
            .iter()
            .map(|(id, link)| (id.clone(), link.metrics().snapshot()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Detach every link, mark all devices disconnected, and drain the links.
    #[instrument(name = "registry_shutdown_links", skip(self))]
    pub async fn shutdown_links(&self) {
        let links: Vec<DeviceLink> = self.links.write().drain().map(|(_, l)| l).collect();
        {
            let mut devices = self.devices.write();
            for link in &links {
                if let Some(device) = devices.get_mut(link.device_id()) {
                    device.status = DeviceStatus::Disconnected;
                }
            }
        }
        self.record_connected();
        for link in links {
            link.shutdown().await;
        }
        debug!("All device links shut down");
    }

    fn record_connected(&self) {
        observability::metrics::record_connected_devices(self.connected_count());
    }
}
