// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the messaging layer.
//!
//! - [`ProtocolError`] - malformed inbound bytes (reported, never fatal by itself)
//! - [`CodecError`] - application payload encode/decode failures
//! - [`Error`] - everything surfaced through the public API

use std::any::Any;
use std::io;

use thiserror::Error;

pub use crate::config::ConfigError;

/// Violations of the wire format detected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown frame type tag {0}")]
    UnknownFrameType(u8),

    #[error("negative {field} length {value}")]
    NegativeLength { field: &'static str, value: i32 },

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("topic is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidTopic { valid_up_to: usize },
}

/// Failure of the pluggable payload codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode message on topic '{topic}': {reason}")]
    Encode { topic: String, reason: String },

    #[error("cannot decode message on topic '{topic}': {reason}")]
    Decode { topic: String, reason: String },
}

impl CodecError {
    pub fn encode(topic: &str, reason: impl ToString) -> Self {
        CodecError::Encode {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(topic: &str, reason: impl ToString) -> Self {
        CodecError::Decode {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("topic is {0} bytes long, the wire format allows at most 255")]
    TopicTooLong(usize),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("callback panicked: {0}")]
    CallbackPanic(String),

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run an application callback, converting a panic into [`Error::CallbackPanic`].
pub(crate) fn guarded<F: FnOnce()>(f: F) -> Result<()> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .map_err(|payload| Error::CallbackPanic(panic_message(payload.as_ref())))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::TopicTooLong(300).to_string(),
            "topic is 300 bytes long, the wire format allows at most 255"
        );
        assert_eq!(
            ProtocolError::UnknownFrameType(9).to_string(),
            "unknown frame type tag 9"
        );
        let err: Error = ProtocolError::NegativeLength {
            field: "payload",
            value: -1,
        }
        .into();
        assert_eq!(err.to_string(), "negative payload length -1");
    }

    #[test]
    fn test_guarded_catches_panic() {
        let err = guarded(|| panic!("boom")).unwrap_err();
        match err {
            Error::CallbackPanic(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {other}"),
        }

        let owned = guarded(|| panic!("{}-{}", "a", 1)).unwrap_err();
        assert!(matches!(owned, Error::CallbackPanic(ref m) if m == "a-1"));

        assert!(guarded(|| {}).is_ok());
    }
}
