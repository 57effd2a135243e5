//! ClockPeer - remote end of the four-timestamp exchange

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument};

use crate::wire::{self, ClockReply};
use crate::SyncError;

/// Remote clock reachable for timestamp exchanges
#[trait_variant::make(ClockPeer: Send)]
pub trait LocalClockPeer {
    /// Peer label used in measurements and logs
    fn label(&self) -> &str;

    /// Send `t1` and wait for the peer's `(t1, t2, t3)` reply.
    async fn exchange(&self, t1: f64) -> Result<ClockReply, SyncError>;
}

/// UDP clock peer.
///
/// Each exchange uses a fresh ephemeral socket so a late reply to a timed-out
/// request can never be mistaken for the answer to the next one.
#[derive(Debug, Clone)]
pub struct UdpClockPeer {
    label: String,
    target: SocketAddr,
    timeout: Duration,
}

impl UdpClockPeer {
    pub fn new(label: impl Into<String>, target: SocketAddr, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            target,
            timeout,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn bind_addr(&self) -> SocketAddr {
        if self.target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        }
    }
}

impl ClockPeer for UdpClockPeer {
    fn label(&self) -> &str {
        &self.label
    }

    #[instrument(
        name = "udp_clock_peer_exchange",
        level = "trace",
        skip(self),
        fields(peer = %self.label, target = %self.target)
    )]
    async fn exchange(&self, t1: f64) -> Result<ClockReply, SyncError> {
        let socket = UdpSocket::bind(self.bind_addr()).await?;
        socket.connect(self.target).await?;
        socket.send(&wire::encode_request(t1)).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 64];
        loop {
            let len = timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| SyncError::Timeout {
                    peer: self.label.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })??;

            let reply = wire::decode_response(&buf[..len])?;
            if reply.t1_echo.to_bits() == t1.to_bits() {
                return Ok(reply);
            }
            // not ours; keep waiting until the deadline
            debug!(
                expected = t1,
                echoed = reply.t1_echo,
                "Discarding clock reply with foreign echo"
            );
        }
    }
}
