//! CommandDispatcher - inbound queue with a single consumer, outbound broadcast

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{CalibrationCommand, CalibrationResponse, ImageSubmission};

use crate::error::DispatcherError;
use crate::registry::DeviceRegistry;

/// Work item handed from connection workers to the processing loop
#[derive(Debug, Clone)]
pub enum Inbound {
    Response(CalibrationResponse),
    Image(ImageSubmission),
}

impl Inbound {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Response(r) => &r.device_id,
            Self::Image(i) => &i.device_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response(_) => "calibration_response",
            Self::Image(_) => "image_data",
        }
    }
}

/// Consumer of inbound items; called from the processing loop only.
#[trait_variant::make(InboundHandler: Send)]
pub trait LocalInboundHandler {
    async fn handle(&self, item: Inbound);
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl BroadcastReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    tx: mpsc::Sender<Inbound>,
    rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    capacity: usize,
    processed: Arc<AtomicU64>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, inbound_capacity: usize) -> Self {
        let capacity = inbound_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            registry,
            tx,
            rx: Mutex::new(Some(rx)),
            capacity,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Items handled by the processing loop so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Queue an item, refusing when the queue is full.
    pub fn try_enqueue(&self, item: Inbound) -> Result<(), DispatcherError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatcherError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => DispatcherError::QueueClosed,
        })
    }

    /// Queue an item, waiting for room.
    pub async fn enqueue(&self, item: Inbound) -> Result<(), DispatcherError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| DispatcherError::QueueClosed)
    }

    /// Deliver `command` to every connected device, or only to its target.
    ///
    /// Each device is attempted independently; failures are reported, not raised.
    #[instrument(
        name = "dispatcher_broadcast",
        skip(self, command),
        fields(command = ?command.command_type, session_id = %command.session_id)
    )]
    pub fn broadcast(&self, command: &CalibrationCommand) -> BroadcastReport {
        let targets = match &command.target_device {
            Some(target) => vec![target.clone()],
            None => self.registry.connected_ids(),
        };

        let mut report = BroadcastReport::default();
        for device_id in targets {
            match self.registry.send_to(&device_id, command.clone()) {
                Ok(()) => report.delivered.push(device_id),
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Command delivery failed");
                    report.failed.push(device_id);
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }

    pub fn send_to(&self, device_id: &str, command: CalibrationCommand) -> Result<(), DispatcherError> {
        self.registry.send_to(device_id, command)
    }

    /// Start the processing loop. Only one loop may run per dispatcher.
    ///
    /// On cancellation the loop drains what is already queued, then returns.
    pub fn spawn_consumer<H>(
        &self,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, DispatcherError>
    where
        H: InboundHandler + Sync + 'static,
    {
        let rx = self.rx.lock().take().ok_or(DispatcherError::ConsumerTaken)?;
        let processed = Arc::clone(&self.processed);
        Ok(tokio::spawn(async move {
            consume(rx, handler, cancel, processed).await;
        }))
    }
}

#[instrument(name = "dispatcher_consume", skip_all)]
async fn consume<H>(
    mut rx: mpsc::Receiver<Inbound>,
    handler: Arc<H>,
    cancel: CancellationToken,
    processed: Arc<AtomicU64>,
) where
    H: InboundHandler + Sync + 'static,
{
    info!("Inbound processing loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => {
                    handler.handle(item).await;
                    processed.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            },
        }
    }

    rx.close();
    let mut drained = 0u64;
    while let Some(item) = rx.recv().await {
        handler.handle(item).await;
        processed.fetch_add(1, Ordering::Relaxed);
        drained += 1;
    }

    info!(
        processed = processed.load(Ordering::Relaxed),
        drained,
        "Inbound processing loop stopped"
    );
}
