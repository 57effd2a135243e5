//! ClockResponder - device side of the clock exchange.
//!
//! Answers every 8-byte request with `(t1 echo, t2, t3)` read from its
//! [`ClockSource`]. Anything else is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::wire::{self, ClockReply};
use crate::{ClockSource, SyncError};

pub struct ClockResponder {
    socket: UdpSocket,
    clock: Arc<dyn ClockSource>,
    answered: AtomicU64,
    dropped: AtomicU64,
}

impl ClockResponder {
    pub async fn bind(addr: SocketAddr, clock: Arc<dyn ClockSource>) -> Result<Self, SyncError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "Clock responder bound");
        Ok(Self {
            socket,
            clock,
            answered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SyncError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Serve requests until `cancel` fires.
    #[instrument(name = "clock_responder_run", skip_all)]
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut buf = [0u8; 64];
        loop {
            let (len, from) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors surface here on some platforms
                        warn!(error = %e, "Clock responder receive failed");
                        continue;
                    }
                },
            };

            let t2 = self.clock.now();
            let Some(t1) = wire::decode_request(&buf[..len]) else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%from, len, "Dropping malformed clock request");
                continue;
            };
            let t3 = self.clock.now();

            let reply = wire::encode_response(ClockReply { t1_echo: t1, t2, t3 });
            match self.socket.send_to(&reply, from).await {
                Ok(_) => {
                    self.answered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(%from, error = %e, "Clock reply send failed"),
            }
        }

        info!(
            answered = self.answered(),
            dropped = self.dropped(),
            "Clock responder stopped"
        );
        Ok(())
    }
}
