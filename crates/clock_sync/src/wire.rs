//! Clock exchange datagram layout
//!
//! Request: `t1` as one big-endian f64 (8 bytes).
//! Reply: `t1` echo, `t2`, `t3` as three big-endian f64 (24 bytes).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::SyncError;

pub const REQUEST_LEN: usize = 8;
pub const RESPONSE_LEN: usize = 24;

/// Timestamps carried by a reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReply {
    pub t1_echo: f64,
    pub t2: f64,
    pub t3: f64,
}

pub fn encode_request(t1: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(REQUEST_LEN);
    buf.put_f64(t1);
    buf.freeze()
}

/// `None` unless the datagram is exactly one timestamp.
pub fn decode_request(mut datagram: &[u8]) -> Option<f64> {
    if datagram.len() != REQUEST_LEN {
        return None;
    }
    Some(datagram.get_f64())
}

pub fn encode_response(reply: ClockReply) -> Bytes {
    let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
    buf.put_f64(reply.t1_echo);
    buf.put_f64(reply.t2);
    buf.put_f64(reply.t3);
    buf.freeze()
}

/// Trailing bytes beyond the three timestamps are ignored.
pub fn decode_response(mut datagram: &[u8]) -> Result<ClockReply, SyncError> {
    if datagram.len() < RESPONSE_LEN {
        return Err(SyncError::MalformedResponse {
            len: datagram.len(),
        });
    }
    Ok(ClockReply {
        t1_echo: datagram.get_f64(),
        t2: datagram.get_f64(),
        t3: datagram.get_f64(),
    })
}
