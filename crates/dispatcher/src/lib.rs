//! # Dispatcher
//!
//! Device-facing plumbing shared by the connection workers and the session logic.
//!
//! - `DeviceRegistry`: device table plus one outbound link per connected device
//! - `DeviceLink`: isolated command queue and writer task, so a slow device
//!   never holds up the others
//! - `CommandDispatcher`: bounded inbound queue drained by one consumer, and
//!   broadcast of outbound commands

pub mod dispatcher;
pub mod error;
pub mod link;
pub mod metrics;
pub mod registry;
pub mod sinks;

pub use dispatcher::{BroadcastReport, CommandDispatcher, Inbound, InboundHandler, LocalInboundHandler};
pub use error::DispatcherError;
pub use link::{ConnectionId, DeviceLink};
pub use metrics::{DeliveryFailure, LinkMetrics, LinkSnapshot};
pub use registry::{DeviceObserver, DeviceRegistry};
pub use sinks::{ChannelSink, LineCommandSink};
