// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resumable protocol parser.
//!
//! TCP delivers a byte stream with no message boundaries, so a read may end
//! in the middle of any field. The parser is a small state machine where
//! every [`State`] declares how many bytes it needs before it can run:
//!
//! ```text
//!            +------ Heartbeat / Disconnect ------+
//!            |                                    |
//!  Root(1) --+-- Data/Sub/Unsub -----+            |
//!            |                       v            |
//!            +-- Req/Reply --> RequestId(4)       |
//!                                    |            |
//!                                    v            |
//!                             TopicLength(1)      |
//!                                    |            |
//!                                    v            |
//!                             TopicBytes(n) ------+ (Sub/Unsub)
//!                                    |            |
//!                                    v            |
//!                            PayloadLength(4)     |
//!                                    |            |
//!                                    v            |
//!                             PayloadBytes(n) ----+--> Root
//! ```
//!
//! The driver runs states while enough bytes are buffered, compacts the
//! buffer, and grows it when the next state needs more than the current
//! capacity. Feeding the same stream in any chunking produces the same
//! sequence of handler calls.

use std::io::{self, Read};
use std::sync::Arc;

use crate::codec::MessageCodec;
use crate::config::{RawFrames, WireConfig};
use crate::error::{CodecError, ProtocolError};
use crate::protocol::buffer::ReadBuffer;
use crate::protocol::frame::{FrameType, INT_FIELD_SIZE};
use crate::protocol::topic::TopicReader;
use crate::stats::WireStats;

/// Callbacks fired by the parser once a frame is recognized.
///
/// Every method has a no-op default so handlers only implement what they
/// care about.
pub trait FrameHandler<M> {
    fn on_heartbeat(&mut self) {}

    /// Peer sent a Disconnect frame.
    fn on_logout(&mut self) {}

    fn on_subscribe(&mut self, topic: &str) {
        let _ = topic;
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        let _ = topic;
    }

    fn on_message(&mut self, topic: &str, message: M) {
        let _ = (topic, message);
    }

    fn on_request(&mut self, request_id: i32, topic: &str, message: M) {
        let _ = (request_id, topic, message);
    }

    fn on_reply(&mut self, request_id: i32, topic: &str, message: M) {
        let _ = (request_id, topic, message);
    }

    /// Complete undecoded Data frame, when the raw observer is enabled.
    fn on_raw_frame(&mut self, topic: &str, frame: &[u8]) {
        let _ = (topic, frame);
    }

    fn on_decode_error(&mut self, error: CodecError) {
        let _ = error;
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        let _ = error;
    }
}

/// Parser position in the frame grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Root,
    RequestId { kind: FrameType },
    TopicLength { kind: FrameType, request_id: i32 },
    TopicBytes { kind: FrameType, request_id: i32, len: usize },
    PayloadLength { kind: FrameType, request_id: i32 },
    PayloadBytes { kind: FrameType, request_id: i32, len: usize },
    /// Skipping an oversized payload
    Discard { remaining: usize },
}

impl State {
    /// Bytes that must be buffered before this state may run.
    pub fn min_bytes(&self) -> usize {
        match self {
            State::Root | State::TopicLength { .. } | State::Discard { .. } => 1,
            State::RequestId { .. } | State::PayloadLength { .. } => INT_FIELD_SIZE,
            State::TopicBytes { len, .. } | State::PayloadBytes { len, .. } => *len,
        }
    }
}

/// Result of one read from the underlying stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were read and every complete frame dispatched
    Data(usize),

    /// Nothing was read; try again
    Retry,

    /// The socket read timeout elapsed; parser position is untouched
    TimedOut,

    /// Peer closed the stream
    Closed,
}

/// Incremental frame parser bound to one connection's read path.
pub struct ProtocolParser<C: MessageCodec> {
    codec: Arc<C>,
    topics: TopicReader,
    buffer: ReadBuffer,
    state: State,
    topic: Option<Arc<str>>,
    raw_frames: RawFrames,
    raw_topic: Vec<u8>,
    raw_scratch: Vec<u8>,
    max_payload: Option<usize>,
    stats: Arc<WireStats>,
}

impl<C: MessageCodec> ProtocolParser<C> {
    pub fn new(codec: Arc<C>, config: &WireConfig) -> Self {
        Self::with_stats(codec, config, Arc::new(WireStats::default()))
    }

    pub fn with_stats(codec: Arc<C>, config: &WireConfig, stats: Arc<WireStats>) -> Self {
        Self {
            codec,
            topics: TopicReader::new(config.topic_cache()),
            buffer: ReadBuffer::with_capacity(config.read_buffer_size),
            state: State::Root,
            topic: None,
            raw_frames: config.raw_frames,
            raw_topic: Vec::new(),
            raw_scratch: Vec::new(),
            max_payload: config.max_payload(),
            stats,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn stats(&self) -> &Arc<WireStats> {
        &self.stats
    }

    pub fn topic_reader(&self) -> &TopicReader {
        &self.topics
    }

    /// Drop buffered bytes and return to `Root`.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::Root;
        self.topic = None;
    }

    /// Parse bytes that were already read from somewhere else.
    pub fn feed<H>(&mut self, mut bytes: &[u8], handler: &mut H)
    where
        H: FrameHandler<C::Message> + ?Sized,
    {
        self.stats.record_bytes_in(bytes.len());
        while !bytes.is_empty() {
            let n = self.buffer.fill_from(bytes);
            bytes = &bytes[n..];
            self.drain(handler);
        }
    }

    /// Perform one read from `reader` and dispatch every complete frame.
    ///
    /// `WouldBlock` and `TimedOut` map to [`ReadOutcome::TimedOut`],
    /// `Interrupted` to [`ReadOutcome::Retry`]. Other errors are returned.
    pub fn read_from<R, H>(&mut self, reader: &mut R, handler: &mut H) -> io::Result<ReadOutcome>
    where
        R: Read + ?Sized,
        H: FrameHandler<C::Message> + ?Sized,
    {
        match reader.read(self.buffer.spare_mut()) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                self.buffer.commit(n);
                self.stats.record_bytes_in(n);
                self.drain(handler);
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(ReadOutcome::TimedOut)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Retry),
            Err(e) => Err(e),
        }
    }

    /// Run states while enough bytes are buffered, then make room for the next one.
    fn drain<H>(&mut self, handler: &mut H)
    where
        H: FrameHandler<C::Message> + ?Sized,
    {
        // zero-length topics and payloads run with nothing buffered
        while self.buffer.len() >= self.state.min_bytes() {
            let (consumed, next) = self.run(self.state, handler);
            self.buffer.consume(consumed);
            self.state = next;
        }

        let required = self.state.min_bytes();
        if self.buffer.ensure_capacity(required) {
            log::debug!(
                "[parser] grew read buffer to {} bytes for {:?}",
                self.buffer.capacity(),
                self.state
            );
        }
    }

    /// Execute one state against the readable bytes.
    fn run<H>(&mut self, state: State, handler: &mut H) -> (usize, State)
    where
        H: FrameHandler<C::Message> + ?Sized,
    {
        let bytes = self.buffer.readable();
        match state {
            State::Root => {
                let tag = bytes[0];
                let next = match FrameType::try_from(tag) {
                    Ok(FrameType::Heartbeat) => {
                        self.stats.record_frame_in();
                        self.stats.record_heartbeat_in();
                        handler.on_heartbeat();
                        State::Root
                    }
                    Ok(FrameType::Disconnect) => {
                        self.stats.record_frame_in();
                        handler.on_logout();
                        State::Root
                    }
                    Ok(kind) if kind.has_request_id() => State::RequestId { kind },
                    Ok(kind) => State::TopicLength {
                        kind,
                        request_id: 0,
                    },
                    Err(e) => {
                        self.stats.record_protocol_error();
                        handler.on_protocol_error(e);
                        State::Root
                    }
                };
                (1, next)
            }
            State::RequestId { kind } => {
                let request_id = read_i32(bytes);
                (INT_FIELD_SIZE, State::TopicLength { kind, request_id })
            }
            State::TopicLength { kind, request_id } => {
                let len = bytes[0] as usize;
                (1, State::TopicBytes { kind, request_id, len })
            }
            State::TopicBytes {
                kind,
                request_id,
                len,
            } => {
                let raw = &bytes[..len];
                let topic = match self.topics.read(raw) {
                    Ok(topic) => topic,
                    Err(e) => {
                        self.topic = None;
                        self.stats.record_protocol_error();
                        handler.on_protocol_error(e);
                        let next = if kind.has_payload() {
                            // payload length still follows; skip the body
                            State::PayloadLength { kind, request_id }
                        } else {
                            State::Root
                        };
                        return (len, next);
                    }
                };
                if self.raw_frames != RawFrames::Disabled && kind == FrameType::Data {
                    self.raw_topic.clear();
                    self.raw_topic.extend_from_slice(raw);
                }
                let next = match kind {
                    FrameType::Subscribe => {
                        self.stats.record_frame_in();
                        handler.on_subscribe(&topic);
                        State::Root
                    }
                    FrameType::Unsubscribe => {
                        self.stats.record_frame_in();
                        handler.on_unsubscribe(&topic);
                        State::Root
                    }
                    _ => {
                        self.topic = Some(topic);
                        State::PayloadLength { kind, request_id }
                    }
                };
                (len, next)
            }
            State::PayloadLength { kind, request_id } => {
                let value = read_i32(bytes);
                let next = match usize::try_from(value) {
                    Err(_) => {
                        self.topic = None;
                        self.stats.record_protocol_error();
                        handler.on_protocol_error(ProtocolError::NegativeLength {
                            field: "payload",
                            value,
                        });
                        State::Root
                    }
                    Ok(len) if self.topic.is_none() => {
                        if len == 0 {
                            State::Root
                        } else {
                            State::Discard { remaining: len }
                        }
                    }
                    Ok(len) if self.max_payload.is_some_and(|max| len > max) => {
                        self.topic = None;
                        self.stats.record_protocol_error();
                        handler.on_protocol_error(ProtocolError::PayloadTooLarge {
                            len,
                            max: self.max_payload.unwrap_or(usize::MAX),
                        });
                        if len == 0 {
                            State::Root
                        } else {
                            State::Discard { remaining: len }
                        }
                    }
                    Ok(len) => State::PayloadBytes {
                        kind,
                        request_id,
                        len,
                    },
                };
                (INT_FIELD_SIZE, next)
            }
            State::PayloadBytes {
                kind,
                request_id,
                len,
            } => {
                self.dispatch_payload(kind, request_id, len, handler);
                (len, State::Root)
            }
            State::Discard { remaining } => {
                let n = remaining.min(bytes.len());
                let next = if n == remaining {
                    State::Root
                } else {
                    State::Discard {
                        remaining: remaining - n,
                    }
                };
                (n, next)
            }
        }
    }

    fn dispatch_payload<H>(&mut self, kind: FrameType, request_id: i32, len: usize, handler: &mut H)
    where
        H: FrameHandler<C::Message> + ?Sized,
    {
        self.stats.record_frame_in();
        let topic = self.topic.take().unwrap_or_else(|| Arc::from(""));
        let payload = &self.buffer.readable()[..len];

        if kind == FrameType::Data && self.raw_frames != RawFrames::Disabled {
            let frame = &mut self.raw_scratch;
            frame.clear();
            frame.reserve(2 + self.raw_topic.len() + INT_FIELD_SIZE + len);
            frame.push(FrameType::Data.tag());
            frame.push(self.raw_topic.len() as u8);
            frame.extend_from_slice(&self.raw_topic);
            frame.extend_from_slice(&(len as i32).to_be_bytes());
            frame.extend_from_slice(payload);
            handler.on_raw_frame(&topic, &self.raw_scratch);
            if self.raw_frames == RawFrames::Instead {
                return;
            }
        }

        let message = match self.codec.decode(&topic, payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.record_decode_error();
                handler.on_decode_error(e);
                return;
            }
        };

        match kind {
            FrameType::DataRequest => handler.on_request(request_id, &topic, message),
            FrameType::DataReply => handler.on_reply(request_id, &topic, message),
            _ => handler.on_message(&topic, message),
        }
    }
}

impl<C: MessageCodec> std::fmt::Debug for ProtocolParser<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolParser")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("raw_frames", &self.raw_frames)
            .finish()
    }
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; INT_FIELD_SIZE];
    raw.copy_from_slice(&bytes[..INT_FIELD_SIZE]);
    i32::from_be_bytes(raw)
}
