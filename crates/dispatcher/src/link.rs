//! DeviceLink - outbound command queue and writer task for one connection

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{CalibrationCommand, CommandSink};

use crate::error::DispatcherError;
use crate::metrics::{DeliveryFailure, LinkMetrics};

/// Identifies one accepted connection; a device may reconnect under a new id.
pub type ConnectionId = u64;

/// Handle to a running link worker.
///
/// A slow or dead device only fills its own queue; senders never wait.
/// A write that times out or fails at the IO level stops the worker and
/// cancels [`DeviceLink::lost`].
pub struct DeviceLink {
    device_id: String,
    connection_id: ConnectionId,
    tx: mpsc::Sender<CalibrationCommand>,
    metrics: Arc<LinkMetrics>,
    lost: CancellationToken,
    worker_handle: JoinHandle<()>,
}

impl DeviceLink {
    /// Spawn the writer task for `sink`
    pub fn spawn<S: CommandSink + Send + 'static>(
        device_id: impl Into<String>,
        connection_id: ConnectionId,
        sink: S,
        queue_capacity: usize,
    ) -> Self {
        let device_id = device_id.into();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(LinkMetrics::new());

        let lost = CancellationToken::new();

        let worker_metrics = Arc::clone(&metrics);
        let worker_device = device_id.clone();
        let worker_lost = lost.clone();

        let worker_handle = tokio::spawn(async move {
            link_worker(sink, rx, worker_metrics, worker_lost, worker_device).await;
        });

        Self {
            device_id,
            connection_id,
            tx,
            metrics,
            lost,
            worker_handle,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    /// Cancelled once the device can no longer be written to.
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Queue a command without waiting.
    pub fn try_send(&self, command: CalibrationCommand) -> Result<(), DispatcherError> {
        match self.tx.try_send(command) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(c)) => {
                self.metrics.record_dropped(c.command_type);
                warn!(
                    device_id = %self.device_id,
                    command = ?c.command_type,
                    "Outbound queue full, command dropped"
                );
                Err(DispatcherError::LinkFull {
                    device_id: self.device_id.clone(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(device_id = %self.device_id, "Link worker has stopped, command not queued");
                Err(DispatcherError::LinkClosed {
                    device_id: self.device_id.clone(),
                })
            }
        }
    }

    /// Drain queued commands, close the sink and wait for the worker.
    #[instrument(name = "device_link_shutdown", skip(self), fields(device_id = %self.device_id))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(device_id = %self.device_id, error = ?e, "Link worker panicked");
        }
        debug!(device_id = %self.device_id, "DeviceLink shutdown complete");
    }
}

#[instrument(
    name = "device_link_worker",
    skip(sink, rx, metrics, lost),
    fields(device_id = %device_id)
)]
async fn link_worker<S: CommandSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<CalibrationCommand>,
    metrics: Arc<LinkMetrics>,
    lost: CancellationToken,
    device_id: String,
) {
    debug!(sink = %sink.name(), "Link worker started");

    while let Some(command) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        let Err(e) = sink.send(&command).await else {
            metrics.record_sent(command.command_type);
            continue;
        };
        let failure = DeliveryFailure::classify(&e);
        metrics.record_failure(command.command_type, failure);
        error!(
            device_id = %device_id,
            command = ?command.command_type,
            reason = failure.as_str(),
            error = %e,
            "Command delivery failed"
        );
        if failure.is_fatal() {
            warn!(
                device_id = %device_id,
                abandoned = rx.len(),
                "Device link lost, stopping writer"
            );
            lost.cancel();
            break;
        }
    }
    rx.close();
    metrics.set_queue_len(0);

    if let Err(e) = sink.flush().await {
        error!(device_id = %device_id, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(device_id = %device_id, error = %e, "Close failed on shutdown");
    }

    debug!("Link worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CommandKind, ContractError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::{sleep, Duration};

    struct MockSink {
        sent: Arc<AtomicU64>,
        should_fail: bool,
        delay_ms: u64,
        stalled: bool,
    }

    impl CommandSink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        async fn send(&mut self, _command: &CalibrationCommand) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.stalled {
                return Err(ContractError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                )));
            }
            if self.should_fail {
                return Err(ContractError::Other("mock failure".into()));
            }
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn command() -> CalibrationCommand {
        CalibrationCommand::new(CommandKind::StartCalibration, "s1")
    }

    #[tokio::test]
    async fn test_link_delivers_in_order() {
        let sent = Arc::new(AtomicU64::new(0));
        let sink = MockSink {
            sent: Arc::clone(&sent),
            should_fail: false,
            delay_ms: 0,
            stalled: false,
        };
        let link = DeviceLink::spawn("devA", 1, sink, 10);
        for _ in 0..5 {
            link.try_send(command()).unwrap();
        }
        link.shutdown().await;
        assert_eq!(sent.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_link_queue_full() {
        let sink = MockSink {
            sent: Arc::new(AtomicU64::new(0)),
            should_fail: false,
            delay_ms: 100,
            stalled: false,
        };
        let link = DeviceLink::spawn("slow", 1, sink, 2);

        let refused = (0..10)
            .filter(|_| matches!(link.try_send(command()), Err(DispatcherError::LinkFull { .. })))
            .count();
        assert!(refused > 0);
        assert_eq!(link.metrics().dropped(), refused as u64);
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_failure_isolation() {
        let sink = MockSink {
            sent: Arc::new(AtomicU64::new(0)),
            should_fail: true,
            delay_ms: 0,
            stalled: false,
        };
        let link = DeviceLink::spawn("failing", 1, sink, 10);
        for _ in 0..3 {
            link.try_send(command()).unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(link.metrics().failures(DeliveryFailure::Other), 3);
        assert!(!link.lost().is_cancelled());
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_timeout_stops_link() {
        let sent = Arc::new(AtomicU64::new(0));
        let sink = MockSink {
            sent: Arc::clone(&sent),
            should_fail: false,
            delay_ms: 0,
            stalled: true,
        };
        let link = DeviceLink::spawn("stalled", 1, sink, 10);
        let lost = link.lost();
        link.try_send(command()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), lost.cancelled())
            .await
            .unwrap();
        assert_eq!(link.metrics().failures(DeliveryFailure::Timeout), 1);
        assert!(matches!(
            link.try_send(command()),
            Err(DispatcherError::LinkClosed { .. })
        ));
        tokio::time::timeout(Duration::from_secs(1), link.shutdown())
            .await
            .unwrap();
        assert_eq!(sent.load(Ordering::Relaxed), 0);
    }
}
