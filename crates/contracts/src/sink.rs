//! CommandSink trait - outbound command transport
//!
//! One sink per connected device; the dispatcher owns it behind a queue.

use crate::{CalibrationCommand, ContractError};

/// Command output trait
///
/// Implemented by the device connection writer and by test recorders.
#[trait_variant::make(CommandSink: Send)]
pub trait LocalCommandSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one command
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn send(&mut self, command: &CalibrationCommand) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
