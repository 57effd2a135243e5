//! ConnectionManager - TCP accept loop and per-connection workers
//!
//! Each connection carries newline-delimited JSON. Registration installs the
//! device and its outbound link; everything else is queued for the
//! processing loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use clock_sync::SyncScheduler;
use contracts::{Device, InboundMessage, NetworkConfig};
use dispatcher::{CommandDispatcher, ConnectionId, Inbound, LineCommandSink};

use crate::error::CoordinatorError;

#[derive(Clone)]
struct WorkerContext {
    dispatcher: Arc<CommandDispatcher>,
    scheduler: Option<Arc<SyncScheduler>>,
    config: NetworkConfig,
}

pub struct ConnectionManager {
    ctx: WorkerContext,
    cancel: Mutex<CancellationToken>,
    tasks: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ConnectionManager {
    pub fn new(
        config: NetworkConfig,
        dispatcher: Arc<CommandDispatcher>,
        scheduler: Option<Arc<SyncScheduler>>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                dispatcher,
                scheduler,
                config,
            },
            cancel: Mutex::new(CancellationToken::new()),
            tasks: TaskTracker::new(),
            local_addr: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bind the listener and start accepting. Returns the bound address.
    #[instrument(name = "connections_start", skip(self), fields(bind = %self.ctx.config.bind_addr))]
    pub async fn start(&self) -> Result<SocketAddr, CoordinatorError> {
        if self.local_addr.lock().is_some() {
            return Err(CoordinatorError::AlreadyRunning);
        }
        let bind = &self.ctx.config.bind_addr;
        let addr: SocketAddr = bind.parse().map_err(|_| CoordinatorError::InvalidAddress {
            addr: bind.clone(),
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CoordinatorError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let cancel = {
            let mut guard = self.cancel.lock();
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };
        self.tasks.reopen();
        *self.local_addr.lock() = Some(local);

        let ctx = self.ctx.clone();
        let tasks = self.tasks.clone();
        self.tasks
            .spawn(accept_loop(listener, ctx, tasks, cancel));

        info!(addr = %local, "Listening for devices");
        Ok(local)
    }

    /// Stop accepting, interrupt every connection and wait for the workers.
    #[instrument(name = "connections_stop", skip(self))]
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        self.tasks.close();
        self.tasks.wait().await;
        *self.local_addr.lock() = None;
        info!("Connection manager stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: WorkerContext,
    tasks: TaskTracker,
    cancel: CancellationToken,
) {
    let accept_timeout = ctx.config.accept_timeout();
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = timeout(accept_timeout, listener.accept()) => accepted,
        };

        match accepted {
            // idle; re-check cancellation
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                debug!(peer = %peer, "Connection accepted");
                observability::metrics::record_connection_event("accepted");
                tasks.spawn(serve_connection(stream, peer, ctx.clone(), cancel.child_token()));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Accept failed");
            }
        }
    }
    debug!("Accept loop stopped");
}

/// One inbound frame. Oversized and non-UTF-8 lines are reported once and
/// skipped; the stream keeps going with the line after them.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    Oversized,
    NotUtf8,
}

struct DeviceLineCodec {
    lines: LinesCodec,
}

impl DeviceLineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

fn frame(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        // LinesCodec discards up to the next newline on the following call
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(Frame::NotUtf8))
        }
        Err(e) => Err(e),
    }
}

impl Decoder for DeviceLineCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        frame(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        frame(self.lines.decode_eof(buf))
    }
}

/// Resolves when the device's outbound link is lost; never without one.
async fn link_lost(lost: &Option<CancellationToken>) {
    match lost {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[instrument(name = "connection_worker", skip(stream, ctx, cancel), fields(peer = %peer))]
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: WorkerContext,
    cancel: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, DeviceLineCodec::new(ctx.config.max_frame_bytes));
    let mut writer = Some(write_half);
    let mut registered: Option<(String, ConnectionId)> = None;
    let mut lost: Option<CancellationToken> = None;
    let read_timeout = ctx.config.read_timeout();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = link_lost(&lost) => {
                info!("Device stopped accepting commands, closing connection");
                break;
            }
            next = timeout(read_timeout, frames.next()) => next,
        };

        let line = match next {
            // idle; re-check cancellation
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(Ok(Frame::Line(line)))) => line,
            Ok(Some(Ok(Frame::Oversized))) => {
                warn!(limit = ctx.config.max_frame_bytes, "Oversized frame dropped");
                observability::metrics::record_connection_event("oversized");
                continue;
            }
            Ok(Some(Ok(Frame::NotUtf8))) => {
                warn!("Non UTF-8 frame dropped");
                observability::metrics::record_connection_event("malformed");
                continue;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Read failed, closing connection");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        if let Some((device_id, _)) = &registered {
            ctx.dispatcher.registry().touch(device_id);
        }

        let message = match InboundMessage::from_json(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed message dropped");
                observability::metrics::record_connection_event("malformed");
                continue;
            }
        };

        match message {
            InboundMessage::DeviceRegistration(registration) => {
                let Some(write_half) = writer.take() else {
                    warn!(device_id = %registration.device_id, "Repeated registration on one connection ignored");
                    continue;
                };
                let device = Device::from_registration(&registration, peer);
                let sink = LineCommandSink::new(device.device_id.clone(), write_half)
                    .with_write_timeout(ctx.config.write_timeout());
                let registry = ctx.dispatcher.registry();
                let (connection_id, replaced) = registry.register(device.clone(), sink);
                if let Some(old) = replaced {
                    tokio::spawn(old.shutdown());
                }
                lost = registry.link_lost(&device.device_id, connection_id);
                if let Some(scheduler) = &ctx.scheduler {
                    scheduler.register_device(&device);
                }
                registered = Some((device.device_id, connection_id));
            }
            InboundMessage::CalibrationResponse(response) => {
                enqueue(&ctx, Inbound::Response(response)).await;
            }
            InboundMessage::ImageData(submission) => {
                enqueue(&ctx, Inbound::Image(submission)).await;
            }
        }
    }

    if let Some((device_id, connection_id)) = registered {
        if let Some(link) = ctx.dispatcher.registry().disconnect(&device_id, connection_id) {
            link.shutdown().await;
            if let Some(scheduler) = &ctx.scheduler {
                scheduler.deactivate(&device_id);
            }
        }
    }
    debug!("Connection closed");
}

async fn enqueue(ctx: &WorkerContext, item: Inbound) {
    let kind = item.kind();
    if let Err(e) = ctx.dispatcher.enqueue(item).await {
        warn!(kind, error = %e, "Inbound message not queued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DeviceStatus;
    use dispatcher::DeviceRegistry;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::{Duration, sleep};

    fn manager() -> (ConnectionManager, Arc<CommandDispatcher>) {
        manager_with(NetworkConfig::default())
    }

    fn manager_with(base: NetworkConfig) -> (ConnectionManager, Arc<CommandDispatcher>) {
        let registry = Arc::new(DeviceRegistry::new(8));
        let dispatcher = Arc::new(CommandDispatcher::new(registry, 8));
        let config = NetworkConfig {
            bind_addr: "127.0.0.1:0".into(),
            accept_timeout_ms: 50,
            ..base
        };
        (
            ConnectionManager::new(config, Arc::clone(&dispatcher), None),
            dispatcher,
        )
    }

    const REGISTRATION: &str = r#"{"type":"device_registration","device_id":"devA","device_name":"rig","device_type":"android","cameras":["cam0"]}"#;
    const RESPONSE: &str = r#"{"type":"calibration_response","response_type":"calibration_started","session_id":"s1","device_id":"devA","success":true}"#;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met");
    }

    #[tokio::test]
    async fn test_registration_and_disconnect() {
        let (manager, dispatcher) = manager();
        let addr = manager.start().await.unwrap();
        let registry = Arc::clone(dispatcher.registry());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        wait_for(|| registry.connected_count() == 1).await;
        assert_eq!(registry.get("devA").unwrap().cameras, vec!["cam0"]);

        drop(client);
        wait_for(|| registry.connected_count() == 0).await;
        let device = registry.get("devA").unwrap();
        assert_eq!(device.status, DeviceStatus::Disconnected);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_close_connection() {
        let (manager, dispatcher) = manager();
        let addr = manager.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{not json\n").await.unwrap();
        client.write_all(b"{\"type\":\"mystery\"}\n").await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        client
            .write_all(format!("{RESPONSE}\n").as_bytes())
            .await
            .unwrap();

        let registry = Arc::clone(dispatcher.registry());
        wait_for(|| registry.connected_count() == 1).await;
        wait_for(|| dispatcher.pending() == 1).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_commands_reach_registered_device() {
        let (manager, dispatcher) = manager();
        let addr = manager.start().await.unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = client.into_split();
        write
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        let registry = Arc::clone(dispatcher.registry());
        wait_for(|| registry.connected_count() == 1).await;

        let cmd = contracts::CalibrationCommand::new(contracts::CommandKind::StartCalibration, "s1");
        assert_eq!(dispatcher.broadcast(&cmd).delivered, vec!["devA"]);

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("\"command_type\":\"start_calibration\""));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_open_connections() {
        let (manager, dispatcher) = manager();
        let addr = manager.start().await.unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        let registry = Arc::clone(dispatcher.registry());
        wait_for(|| registry.connected_count() == 1).await;

        tokio::time::timeout(Duration::from_secs(2), manager.stop())
            .await
            .unwrap();
        assert_eq!(registry.connected_count(), 0);
        assert!(manager.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_idle_device_stays_connected() {
        let (manager, dispatcher) = manager_with(NetworkConfig {
            read_timeout_ms: 100,
            ..Default::default()
        });
        let addr = manager.start().await.unwrap();
        let registry = Arc::clone(dispatcher.registry());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        wait_for(|| registry.connected_count() == 1).await;

        // several read timeouts pass without a byte from the device
        sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(registry.get("devA").unwrap().status, DeviceStatus::Connected);

        client
            .write_all(format!("{RESPONSE}\n").as_bytes())
            .await
            .unwrap();
        wait_for(|| dispatcher.pending() == 1).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let (manager, dispatcher) = manager_with(NetworkConfig {
            max_frame_bytes: 512,
            ..Default::default()
        });
        let addr = manager.start().await.unwrap();
        let registry = Arc::clone(dispatcher.registry());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        wait_for(|| registry.connected_count() == 1).await;

        let oversized = format!("{{\"type\":\"image_data\",\"image\":\"{}\"}}\n", "A".repeat(2000));
        client.write_all(oversized.as_bytes()).await.unwrap();
        client
            .write_all(format!("{RESPONSE}\n").as_bytes())
            .await
            .unwrap();

        wait_for(|| dispatcher.pending() == 1).await;
        assert_eq!(registry.connected_count(), 1);
        manager.stop().await;
    }

    #[test]
    fn test_codec_resumes_after_oversized_line() {
        let mut codec = DeviceLineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef\nok\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Oversized));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Line("ok".into())));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        let mut buf = BytesMut::from(&b"\xff\xfe\nok\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::NotUtf8));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Line("ok".into())));
    }

    #[tokio::test]
    async fn test_device_that_stops_reading_is_disconnected() {
        let (manager, dispatcher) = manager_with(NetworkConfig {
            write_timeout_ms: 100,
            ..Default::default()
        });
        let addr = manager.start().await.unwrap();
        let registry = Arc::clone(dispatcher.registry());

        // registered but never reads its socket
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("{REGISTRATION}\n").as_bytes())
            .await
            .unwrap();
        wait_for(|| registry.connected_count() == 1).await;

        // enough to fill both socket buffers
        let padding = "x".repeat(256 * 1024);
        let cmd = contracts::CalibrationCommand::new(contracts::CommandKind::PhaseChanged, "s1")
            .with_param("padding", padding);
        for _ in 0..200 {
            if registry.connected_count() == 0 {
                break;
            }
            let _ = registry.send_to("devA", cmd.clone());
            sleep(Duration::from_millis(10)).await;
        }
        wait_for(|| registry.connected_count() == 0).await;
        assert_eq!(registry.get("devA").unwrap().status, DeviceStatus::Disconnected);

        tokio::time::timeout(Duration::from_secs(2), manager.stop())
            .await
            .unwrap();
        drop(client);
    }
}
