// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame encoding.
//!
//! Every frame starts with a one-byte type tag. All integers are big-endian.
//!
//! ```text
//! Heartbeat    [1]
//! Disconnect   [2]
//! Subscribe    [3][topicLen u8][topic]
//! Data         [4][topicLen u8][topic][payloadLen i32][payload]
//! Unsubscribe  [5][topicLen u8][topic]
//! DataRequest  [6][reqId i32][topicLen u8][topic][payloadLen i32][payload]
//! DataReply    [7][reqId i32][topicLen u8][topic][payloadLen i32][payload]
//! ```
//!
//! Encoders append to a caller-owned buffer. On failure the buffer is
//! truncated back to its original length, so a rejected frame never leaves
//! partial bytes behind.

use std::fmt;

use crate::codec::MessageCodec;
use crate::error::{CodecError, Error, ProtocolError, Result};

/// Longest topic representable by the one-byte length prefix.
pub const MAX_TOPIC_LEN: usize = u8::MAX as usize;

/// Size of the request id and payload length fields.
pub const INT_FIELD_SIZE: usize = 4;

/// Frame type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Heartbeat = 1,
    Disconnect = 2,
    Subscribe = 3,
    Data = 4,
    Unsubscribe = 5,
    DataRequest = 6,
    DataReply = 7,
}

impl FrameType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Request and reply frames carry a request id before the topic.
    pub fn has_request_id(self) -> bool {
        matches!(self, FrameType::DataRequest | FrameType::DataReply)
    }

    pub fn has_topic(self) -> bool {
        !matches!(self, FrameType::Heartbeat | FrameType::Disconnect)
    }

    pub fn has_payload(self) -> bool {
        matches!(
            self,
            FrameType::Data | FrameType::DataRequest | FrameType::DataReply
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> std::result::Result<Self, ProtocolError> {
        match tag {
            1 => Ok(FrameType::Heartbeat),
            2 => Ok(FrameType::Disconnect),
            3 => Ok(FrameType::Subscribe),
            4 => Ok(FrameType::Data),
            5 => Ok(FrameType::Unsubscribe),
            6 => Ok(FrameType::DataRequest),
            7 => Ok(FrameType::DataReply),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::Heartbeat => "Heartbeat",
            FrameType::Disconnect => "Disconnect",
            FrameType::Subscribe => "Subscribe",
            FrameType::Data => "Data",
            FrameType::Unsubscribe => "Unsubscribe",
            FrameType::DataRequest => "DataRequest",
            FrameType::DataReply => "DataReply",
        };
        write!(f, "{}", s)
    }
}

/// A complete frame with an already-encoded payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Disconnect,
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Data { topic: String, payload: Vec<u8> },
    Request { id: i32, topic: String, payload: Vec<u8> },
    Reply { id: i32, topic: String, payload: Vec<u8> },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Heartbeat => FrameType::Heartbeat,
            Frame::Disconnect => FrameType::Disconnect,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Data { .. } => FrameType::Data,
            Frame::Request { .. } => FrameType::DataRequest,
            Frame::Reply { .. } => FrameType::DataReply,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Frame::Heartbeat | Frame::Disconnect => None,
            Frame::Subscribe { topic }
            | Frame::Unsubscribe { topic }
            | Frame::Data { topic, .. }
            | Frame::Request { topic, .. }
            | Frame::Reply { topic, .. } => Some(topic),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Frame::Heartbeat => {
                encode_heartbeat(out);
                Ok(())
            }
            Frame::Disconnect => {
                encode_disconnect(out);
                Ok(())
            }
            Frame::Subscribe { topic } => encode_subscribe(topic, out),
            Frame::Unsubscribe { topic } => encode_unsubscribe(topic, out),
            Frame::Data { topic, payload } => {
                encode_with_payload(FrameType::Data, None, topic, out, |buf| {
                    buf.extend_from_slice(payload);
                    Ok(())
                })
            }
            Frame::Request { id, topic, payload } => {
                encode_with_payload(FrameType::DataRequest, Some(*id), topic, out, |buf| {
                    buf.extend_from_slice(payload);
                    Ok(())
                })
            }
            Frame::Reply { id, topic, payload } => {
                encode_with_payload(FrameType::DataReply, Some(*id), topic, out, |buf| {
                    buf.extend_from_slice(payload);
                    Ok(())
                })
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

/// Reject topics that cannot be represented by the length prefix.
pub fn check_topic(topic: &str) -> Result<()> {
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::TopicTooLong(topic.len()));
    }
    Ok(())
}

pub fn encode_heartbeat(out: &mut Vec<u8>) {
    out.push(FrameType::Heartbeat.tag());
}

pub fn encode_disconnect(out: &mut Vec<u8>) {
    out.push(FrameType::Disconnect.tag());
}

pub fn encode_subscribe(topic: &str, out: &mut Vec<u8>) -> Result<()> {
    encode_topic_only(FrameType::Subscribe, topic, out)
}

pub fn encode_unsubscribe(topic: &str, out: &mut Vec<u8>) -> Result<()> {
    encode_topic_only(FrameType::Unsubscribe, topic, out)
}

/// Encode a Data frame, running the codec straight into `out`.
pub fn encode_message<C: MessageCodec>(
    codec: &C,
    topic: &str,
    message: &C::Message,
    out: &mut Vec<u8>,
) -> Result<()> {
    encode_with_payload(FrameType::Data, None, topic, out, |buf| {
        codec.encode(topic, message, buf)
    })
}

pub fn encode_request<C: MessageCodec>(
    codec: &C,
    request_id: i32,
    topic: &str,
    message: &C::Message,
    out: &mut Vec<u8>,
) -> Result<()> {
    encode_with_payload(FrameType::DataRequest, Some(request_id), topic, out, |buf| {
        codec.encode(topic, message, buf)
    })
}

pub fn encode_reply<C: MessageCodec>(
    codec: &C,
    request_id: i32,
    topic: &str,
    message: &C::Message,
    out: &mut Vec<u8>,
) -> Result<()> {
    encode_with_payload(FrameType::DataReply, Some(request_id), topic, out, |buf| {
        codec.encode(topic, message, buf)
    })
}

fn encode_topic_only(kind: FrameType, topic: &str, out: &mut Vec<u8>) -> Result<()> {
    check_topic(topic)?;
    out.reserve(2 + topic.len());
    out.push(kind.tag());
    out.push(topic.len() as u8);
    out.extend_from_slice(topic.as_bytes());
    Ok(())
}

/// Write header and topic, let `body` append the payload, then patch the
/// length prefix in place.
fn encode_with_payload<F>(
    kind: FrameType,
    request_id: Option<i32>,
    topic: &str,
    out: &mut Vec<u8>,
    body: F,
) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> std::result::Result<(), CodecError>,
{
    check_topic(topic)?;

    let start = out.len();
    out.push(kind.tag());
    if let Some(id) = request_id {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out.push(topic.len() as u8);
    out.extend_from_slice(topic.as_bytes());

    let len_pos = out.len();
    out.extend_from_slice(&[0; INT_FIELD_SIZE]);

    if let Err(e) = body(out) {
        out.truncate(start);
        return Err(e.into());
    }

    let payload_len = out.len() - len_pos - INT_FIELD_SIZE;
    let Ok(wire_len) = i32::try_from(payload_len) else {
        out.truncate(start);
        return Err(ProtocolError::PayloadTooLarge {
            len: payload_len,
            max: i32::MAX as usize,
        }
        .into());
    };
    out[len_pos..len_pos + INT_FIELD_SIZE].copy_from_slice(&wire_len.to_be_bytes());
    Ok(())
}
