// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client connection state machine.
//!
//! ```text
//! Disconnected --connect--> Connecting --established--> Connected
//!      ^                        |                           |
//!      |                   connect failed              EOF / error
//!      +------ retry after reconnect delay <----------------+
//!
//! close() from any state: --> Closing --> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket; a retry may be scheduled
    #[default]
    Disconnected = 0,

    /// Connect attempt in progress
    Connecting = 1,

    /// Socket established, subscriptions replayed
    Connected = 2,

    /// `close()` in progress
    Closing = 3,

    /// Terminal
    Closed = 4,
}

impl ConnectionState {
    /// Check if the connection can send data.
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if the connection is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// `Closing` or `Closed`: no further connect attempts.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Lock-free holder for the current [`ConnectionState`].
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Enter `Closing` unless already shutting down. Returns whether it moved.
    pub(crate) fn begin_close(&self) -> bool {
        self.advance(ConnectionState::Closing)
    }

    /// Move to `next` unless shutting down. Returns whether it moved.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if ConnectionState::from_u8(current).is_shutting_down() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_operational());
        assert!(!ConnectionState::Connecting.is_operational());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Closing.is_shutting_down());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert!(cell.advance(ConnectionState::Connecting));
        assert!(cell.advance(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Connected);

        assert!(cell.begin_close());
        assert!(!cell.begin_close());
        assert!(!cell.advance(ConnectionState::Connecting));
        assert_eq!(cell.get(), ConnectionState::Closing);

        cell.set(ConnectionState::Closed);
        assert!(!cell.advance(ConnectionState::Disconnected));
        assert_eq!(cell.get().to_string(), "Closed");
    }
}
