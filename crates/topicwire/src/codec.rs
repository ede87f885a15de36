// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pluggable payload codecs.
//!
//! The wire format treats payloads as opaque bytes. A [`MessageCodec`] turns
//! application messages into those bytes and back; the topic is passed along
//! so a codec may pick a representation per topic.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encoder/decoder pair for application messages.
pub trait MessageCodec: Send + Sync + 'static {
    type Message: Send + 'static;

    /// Append the encoded form of `message` to `out`.
    fn encode(
        &self,
        topic: &str,
        message: &Self::Message,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError>;

    /// Decode a complete payload.
    fn decode(&self, topic: &str, bytes: &[u8]) -> Result<Self::Message, CodecError>;
}

/// Pass-through codec for byte payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Message = Vec<u8>;

    fn encode(&self, _topic: &str, message: &Vec<u8>, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(message);
        Ok(())
    }

    fn decode(&self, _topic: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 text payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl MessageCodec for Utf8Codec {
    type Message = String;

    fn encode(&self, _topic: &str, message: &String, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(message.as_bytes());
        Ok(())
    }

    fn decode(&self, topic: &str, bytes: &[u8]) -> Result<String, CodecError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| CodecError::decode(topic, e))
    }
}

/// JSON payloads through `serde_json`.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> MessageCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Message = T;

    fn encode(&self, topic: &str, message: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
        serde_json::to_writer(out, message).map_err(|e| CodecError::encode(topic, e))
    }

    fn decode(&self, topic: &str, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decode(topic, e))
    }
}
