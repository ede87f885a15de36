// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client lifecycle listener and close reasons.

use std::fmt;

use crate::error::Error;

/// Why a client connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `close(true)` and the server acknowledged the logout
    Graceful,

    /// `close(true)` but no acknowledgement arrived within the logout timeout
    LogoutNotConfirmed,

    /// `close(false)`
    Closed,

    /// Server closed the socket without logging out
    PeerClosed,

    /// Server sent Disconnect
    ServerLogout,

    ReadError(String),

    WriteError(String),

    ConnectFailed(String),
}

impl CloseReason {
    /// Expected shutdowns versus transport failures.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CloseReason::ReadError(_) | CloseReason::WriteError(_) | CloseReason::ConnectFailed(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Graceful => write!(f, "graceful logout"),
            CloseReason::LogoutNotConfirmed => write!(f, "logout not confirmed"),
            CloseReason::Closed => write!(f, "closed"),
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ServerLogout => write!(f, "server logout"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::WriteError(e) => write!(f, "write error: {}", e),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
        }
    }
}

/// Receives client connection events.
///
/// `on_connected`, `on_disconnected` and `on_closed` run on the client fiber;
/// `on_read_timeout` and `on_raw_frame` run on the reader thread. Every method
/// defaults to a no-op.
pub trait ClientListener: Send + Sync + 'static {
    /// Subscriptions have already been replayed on the new connection.
    fn on_connected(&self) {}

    /// The connection was lost; a retry is scheduled unless reconnect is
    /// disabled.
    fn on_disconnected(&self, reason: &CloseReason) {
        let _ = reason;
    }

    /// No inbound traffic within the read timeout. The connection stays open.
    fn on_read_timeout(&self) {}

    /// Undecoded Data frame, when raw frames are enabled. Runs on the reader
    /// thread.
    fn on_raw_frame(&self, topic: &str, frame: &[u8]) {
        let _ = (topic, frame);
    }

    fn on_error(&self, error: &Error) {
        let _ = error;
    }

    /// Terminal. Called once, after `close()`.
    fn on_closed(&self, reason: &CloseReason) {
        let _ = reason;
    }
}

impl ClientListener for () {}
