//! LineCommandSink - newline-delimited JSON commands over a byte stream

use std::io;
use std::time::Duration;

use contracts::{CalibrationCommand, CommandSink, ContractError};
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_util::codec::{FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, instrument, warn};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes one JSON object per line to the write half of a device connection.
///
/// Every write, flush and close is bounded by the write timeout. After a
/// timeout the writer is dropped and later calls fail immediately.
pub struct LineCommandSink<W> {
    name: String,
    framed: Option<FramedWrite<W, LinesCodec>>,
    write_timeout: Duration,
}

impl<W> LineCommandSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            framed: Some(FramedWrite::new(writer, LinesCodec::new())),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    fn framed(&mut self) -> Result<&mut FramedWrite<W, LinesCodec>, ContractError> {
        let name = &self.name;
        self.framed
            .as_mut()
            .ok_or_else(|| ContractError::Other(format!("sink '{name}' already closed")))
    }

    /// Map the result of a timed write step. An expired step drops the writer.
    fn settle(
        &mut self,
        op: &'static str,
        outcome: Result<Result<(), LinesCodecError>, Elapsed>,
    ) -> Result<(), ContractError> {
        match outcome {
            Ok(result) => result.map_err(codec_error),
            Err(_) => {
                warn!(
                    sink = %self.name,
                    op,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Device write timed out, dropping writer"
                );
                self.framed = None;
                Err(ContractError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{op} to '{}' timed out", self.name),
                )))
            }
        }
    }
}

fn codec_error(e: LinesCodecError) -> ContractError {
    match e {
        LinesCodecError::Io(io) => ContractError::Io(io),
        other => ContractError::encode("calibration_command", other.to_string()),
    }
}

impl<W> CommandSink for LineCommandSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "line_sink_send",
        skip(self, command),
        fields(sink = %self.name, command = ?command.command_type)
    )]
    async fn send(&mut self, command: &CalibrationCommand) -> Result<(), ContractError> {
        let line = serde_json::to_string(command)
            .map_err(|e| ContractError::encode("calibration_command", e.to_string()))?;
        let write_timeout = self.write_timeout;
        let outcome = timeout(write_timeout, self.framed()?.send(line)).await;
        self.settle("write", outcome)
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        let write_timeout = self.write_timeout;
        let Some(framed) = self.framed.as_mut() else {
            return Ok(());
        };
        let outcome = timeout(write_timeout, SinkExt::<String>::flush(framed)).await;
        self.settle("flush", outcome)
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        let Some(mut framed) = self.framed.take() else {
            return Ok(());
        };
        let outcome = timeout(self.write_timeout, SinkExt::<String>::close(&mut framed)).await;
        self.settle("close", outcome)?;
        debug!(sink = %self.name, "LineCommandSink closed");
        Ok(())
    }
}
