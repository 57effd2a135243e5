//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Inbound queue full - item not accepted
    #[error("inbound queue full ({capacity} items)")]
    QueueFull { capacity: usize },

    /// Processing loop has stopped
    #[error("inbound queue closed")]
    QueueClosed,

    /// Outbound link has no room for another command
    #[error("outbound queue full for device '{device_id}'")]
    LinkFull { device_id: String },

    /// Outbound link worker has stopped
    #[error("link to device '{device_id}' is closed")]
    LinkClosed { device_id: String },

    #[error("device '{device_id}' has no active connection")]
    NotConnected { device_id: String },

    /// The processing loop was already started
    #[error("inbound consumer already running")]
    ConsumerTaken,

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
