// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # topicwire - broker-less topic messaging over TCP
//!
//! Publish/subscribe and request/reply between a server and many long-lived
//! clients, over persistent TCP connections and a compact binary framing.
//! Payloads are opaque to the transport; a [`MessageCodec`] turns them into
//! application values.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topicwire::{Client, ClientConfig, Result, Server, ServerConfig, Utf8Codec};
//!
//! fn main() -> Result<()> {
//!     let server = Server::bind(ServerConfig::localhost().with_port(7400), Utf8Codec, ())?;
//!
//!     let client = Client::connect(server.local_addr(), ClientConfig::default(), Utf8Codec, ())?;
//!     let _sub = client.subscribe("prices", |price: &String| println!("price {}", price))?;
//!
//!     server.publish("prices", "100".to_string())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Server (hub fiber, sessions, broadcast)  |  Client (reconnect,    |
//! |                                            |  subscriptions, RPC)   |
//! +---------------------------------------------------------------------+
//! |   transport: reader thread per socket, Outbound on a writer fiber   |
//! +---------------------------------------------------------------------+
//! |   protocol: Frame encoders | resumable ProtocolParser | TopicReader  |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Wire Format
//!
//! Every frame starts with a one-byte type tag; integers are big-endian.
//!
//! | Tag | Frame | Body |
//! |-----|-------|------|
//! | 1 | Heartbeat | - |
//! | 2 | Disconnect | - |
//! | 3 | Subscribe | topic len (u8), topic |
//! | 4 | Data | topic len (u8), topic, payload len (i32), payload |
//! | 5 | Unsubscribe | topic len (u8), topic |
//! | 6 | DataRequest | request id (i32), topic, payload |
//! | 7 | DataReply | request id (i32), topic, payload |
//!
//! ## Modules Overview
//!
//! - [`server`] - sessions, serialize-once broadcast, listener
//! - [`client`] - connection manager, subscriptions, request correlation
//! - [`protocol`] - frame codec and parser
//! - [`transport`] - socket setup, read loop, buffered writer
//! - [`fiber`] - serial execution contexts with timers

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client: connection manager, local subscriptions, request/reply.
pub mod client;
/// Pluggable payload codecs.
pub mod codec;
/// Client, server and wire configuration (TOML loadable).
pub mod config;
/// Error types.
pub mod error;
/// Serial executors with timers.
pub mod fiber;
/// Wire format: frames, parser, topic decoding.
pub mod protocol;
/// Server: sessions, hub, broadcast.
pub mod server;
/// Traffic counters.
pub mod stats;
/// Socket plumbing shared by client and server.
pub mod transport;

pub use client::{
    Client, ClientListener, CloseReason, ConnectionState, PendingRequest, RequestEnd,
    RequestTimeout, Subscription,
};
pub use codec::{JsonCodec, MessageCodec, RawCodec, Utf8Codec};
pub use config::{ClientConfig, RawFrames, ServerConfig, WireConfig};
pub use error::{CodecError, ConfigError, Error, ProtocolError, Result};
pub use fiber::{Fiber, ThreadFiber, TimerHandle};
pub use protocol::{Frame, FrameHandler, FrameType, ProtocolParser, MAX_TOPIC_LEN};
pub use server::{
    BroadcastStats, Replier, Server, ServerListener, Session, SessionCloseReason, SessionId,
};
pub use stats::{WireStats, WireStatsSnapshot};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _ = std::any::type_name::<Server<Utf8Codec>>();
        let _ = std::any::type_name::<Client<RawCodec>>();
        let _ = std::any::type_name::<JsonCodec<serde_json::Value>>();
        assert_eq!(MAX_TOPIC_LEN, 255);
        assert_eq!(FrameType::DataReply.tag(), 7);
        assert!(!VERSION.is_empty());
    }
}
