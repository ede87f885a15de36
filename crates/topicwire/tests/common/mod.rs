// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the loopback integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use topicwire::{ClientConfig, Frame, FrameHandler, ProtocolParser, RawCodec, WireConfig};
use topicwire::protocol::ReadOutcome;

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Client config for tests: fast reconnect, no heartbeat noise.
pub fn quiet_client_config() -> ClientConfig {
    ClientConfig::default()
        .with_wire(WireConfig::default().with_heartbeat_interval(Duration::ZERO))
        .with_reconnect_delay(Some(Duration::from_millis(50)))
        .with_logout_timeout(Duration::from_secs(2))
}

/// Records every frame a raw peer receives.
#[derive(Default)]
pub struct Collector {
    pub frames: Vec<Frame>,
}

impl FrameHandler<Vec<u8>> for Collector {
    fn on_heartbeat(&mut self) {
        self.frames.push(Frame::Heartbeat);
    }

    fn on_logout(&mut self) {
        self.frames.push(Frame::Disconnect);
    }

    fn on_subscribe(&mut self, topic: &str) {
        self.frames.push(Frame::Subscribe {
            topic: topic.to_string(),
        });
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        self.frames.push(Frame::Unsubscribe {
            topic: topic.to_string(),
        });
    }

    fn on_message(&mut self, topic: &str, payload: Vec<u8>) {
        self.frames.push(Frame::Data {
            topic: topic.to_string(),
            payload,
        });
    }

    fn on_request(&mut self, id: i32, topic: &str, payload: Vec<u8>) {
        self.frames.push(Frame::Request {
            id,
            topic: topic.to_string(),
            payload,
        });
    }

    fn on_reply(&mut self, id: i32, topic: &str, payload: Vec<u8>) {
        self.frames.push(Frame::Reply {
            id,
            topic: topic.to_string(),
            payload,
        });
    }
}

/// Hand-driven peer that speaks the wire format directly.
pub struct RawPeer {
    pub stream: TcpStream,
    parser: ProtocolParser<RawCodec>,
    pub collector: Collector,
}

impl RawPeer {
    pub fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept");
        Self::over(stream)
    }

    /// Wrap an already connected stream, e.g. a raw client of a real server.
    pub fn over(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("read timeout");
        Self {
            stream,
            parser: ProtocolParser::new(Arc::new(RawCodec), &WireConfig::default()),
            collector: Collector::default(),
        }
    }

    /// Read until `count` frames were collected in total. Returns false on
    /// timeout or EOF.
    pub fn read_frames(&mut self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.collector.frames.len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            match self.parser.read_from(&mut self.stream, &mut self.collector) {
                Ok(ReadOutcome::Closed) | Err(_) => return false,
                Ok(_) => {}
            }
        }
        true
    }

    /// Keep reading for `period` and return whatever arrived.
    pub fn drain_for(&mut self, period: Duration) -> &[Frame] {
        let deadline = Instant::now() + period;
        while Instant::now() < deadline {
            match self.parser.read_from(&mut self.stream, &mut self.collector) {
                Ok(ReadOutcome::Closed) | Err(_) => break,
                Ok(_) => {}
            }
        }
        &self.collector.frames
    }

    pub fn send(&mut self, frame: &Frame) {
        let bytes = frame.to_bytes().expect("encode");
        self.stream.write_all(&bytes).expect("write");
    }
}
