//! ChannelSink - forwards commands into an in-process channel
//!
//! Used where a device is simulated in-process (tests, local tooling).

use contracts::{CalibrationCommand, CommandSink, ContractError};
use tokio::sync::mpsc;

pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<CalibrationCommand>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes what it was sent.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<CalibrationCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl CommandSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, command: &CalibrationCommand) -> Result<(), ContractError> {
        self.tx
            .send(command.clone())
            .map_err(|_| ContractError::Other(format!("receiver for '{}' dropped", self.name)))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
