// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol: frame encoding and the resumable parser.

pub mod buffer;
pub mod frame;
pub mod parser;
pub mod topic;

pub use buffer::ReadBuffer;
pub use frame::{
    check_topic, encode_disconnect, encode_heartbeat, encode_message, encode_reply,
    encode_request, encode_subscribe, encode_unsubscribe, Frame, FrameType, MAX_TOPIC_LEN,
};
pub use parser::{FrameHandler, ProtocolParser, ReadOutcome, State};
pub use topic::TopicReader;
