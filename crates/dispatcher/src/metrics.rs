//! Delivery accounting for outbound device links
//!
//! Counts are kept per link for status reports and mirrored to the
//! `calib_coord_commands_total` counter.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use contracts::{CommandKind, ContractError};

/// Why a command did not reach its device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The device stopped reading and the write did not finish in time
    Timeout,
    /// The connection failed underneath the write
    Io,
    /// The command could not be serialized
    Encode,
    Other,
}

impl DeliveryFailure {
    pub fn classify(error: &ContractError) -> Self {
        match error {
            ContractError::Io(e) if e.kind() == io::ErrorKind::TimedOut => Self::Timeout,
            ContractError::Io(_) => Self::Io,
            ContractError::Encode { .. } => Self::Encode,
            _ => Self::Other,
        }
    }

    /// The link cannot carry any further commands.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Timeout | Self::Io)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Encode => "encode",
            Self::Other => "other",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Timeout => 0,
            Self::Io => 1,
            Self::Encode => 2,
            Self::Other => 3,
        }
    }
}

/// Counters for one device link
#[derive(Debug, Default)]
pub struct LinkMetrics {
    queue_len: AtomicUsize,
    start_calibration_sent: AtomicU64,
    phase_changed_sent: AtomicU64,
    /// Indexed by [`DeliveryFailure::index`]
    failures: [AtomicU64; 4],
    /// Refused because the queue was full
    dropped: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    fn sent_counter(&self, kind: CommandKind) -> &AtomicU64 {
        match kind {
            CommandKind::StartCalibration => &self.start_calibration_sent,
            CommandKind::PhaseChanged => &self.phase_changed_sent,
        }
    }

    pub fn record_sent(&self, kind: CommandKind) {
        self.sent_counter(kind).fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_command_delivery(kind.as_str(), "sent");
    }

    pub fn record_failure(&self, kind: CommandKind, failure: DeliveryFailure) {
        self.failures[failure.index()].fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_command_delivery(kind.as_str(), failure.as_str());
    }

    pub fn record_dropped(&self, kind: CommandKind) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_command_delivery(kind.as_str(), "dropped");
    }

    pub fn sent(&self, kind: CommandKind) -> u64 {
        self.sent_counter(kind).load(Ordering::Relaxed)
    }

    pub fn failures(&self, failure: DeliveryFailure) -> u64 {
        self.failures[failure.index()].load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            queue_len: self.queue_len(),
            start_calibration_sent: self.sent(CommandKind::StartCalibration),
            phase_changed_sent: self.sent(CommandKind::PhaseChanged),
            write_timeouts: self.failures(DeliveryFailure::Timeout),
            io_errors: self.failures(DeliveryFailure::Io),
            encode_errors: self.failures(DeliveryFailure::Encode),
            other_errors: self.failures(DeliveryFailure::Other),
            dropped: self.dropped(),
        }
    }
}

/// Point-in-time copy of [`LinkMetrics`] for status reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub queue_len: usize,
    pub start_calibration_sent: u64,
    pub phase_changed_sent: u64,
    pub write_timeouts: u64,
    pub io_errors: u64,
    pub encode_errors: u64,
    pub other_errors: u64,
    pub dropped: u64,
}

impl LinkSnapshot {
    pub fn sent(&self) -> u64 {
        self.start_calibration_sent + self.phase_changed_sent
    }

    pub fn failed(&self) -> u64 {
        self.write_timeouts + self.io_errors + self.encode_errors + self.other_errors
    }
}
