//! Clock sync error types

use thiserror::Error;

/// A single failed exchange. Counted, never fatal.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No matching reply within the exchange timeout
    #[error("no reply from {peer} within {timeout_ms} ms")]
    Timeout { peer: String, timeout_ms: u64 },

    /// Reply shorter than three timestamps
    #[error("malformed clock reply ({len} bytes)")]
    MalformedResponse { len: usize },

    /// Reply echoes a different request timestamp
    #[error("reply echoes t1={echoed}, expected {expected}")]
    EchoMismatch { expected: f64, echoed: f64 },

    /// Every exchange in a burst failed
    #[error("all {attempts} burst exchanges failed")]
    BurstFailed { attempts: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
