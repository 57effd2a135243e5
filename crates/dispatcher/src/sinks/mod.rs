//! Command sink implementations

mod channel;
mod line;

pub use channel::ChannelSink;
pub use line::LineCommandSink;
