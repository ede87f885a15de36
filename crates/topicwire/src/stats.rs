// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by a connection's read and write paths.
#[derive(Debug, Default)]
pub struct WireStats {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    heartbeats_in: AtomicU64,
    protocol_errors: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`WireStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WireStatsSnapshot {
    /// Complete frames parsed
    pub frames_in: u64,

    /// Frames enqueued for sending
    pub frames_out: u64,

    /// Raw bytes read from the socket
    pub bytes_in: u64,

    /// Raw bytes written to the socket
    pub bytes_out: u64,

    pub heartbeats_in: u64,

    /// Unknown tags and malformed lengths
    pub protocol_errors: u64,

    /// Payloads the codec could not decode
    pub decode_errors: u64,
}

impl WireStats {
    pub fn snapshot(&self) -> WireStatsSnapshot {
        WireStatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            heartbeats_in: self.heartbeats_in.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_in(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_out(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_in(&self) {
        self.heartbeats_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = WireStats::default();
        stats.record_frame_in();
        stats.record_bytes_in(10);
        stats.record_frame_out();
        stats.record_bytes_out(3);
        stats.record_bytes_out(4);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_in, 1);
        assert_eq!(snap.bytes_in, 10);
        assert_eq!(snap.frames_out, 1);
        assert_eq!(snap.bytes_out, 7);
        assert_eq!(snap.protocol_errors, 0);
    }
}
