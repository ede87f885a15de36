// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking read loop shared by client and server connections.

use std::io::{self, Read};

use crate::codec::MessageCodec;
use crate::protocol::{FrameHandler, ProtocolParser, ReadOutcome};

/// Read-path callbacks beyond frame dispatch.
pub trait ReadLoopHandler<M>: FrameHandler<M> {
    /// No bytes arrived within the read timeout.
    fn on_read_timeout(&mut self);

    /// Checked before every read; `true` ends the loop.
    fn should_stop(&self) -> bool;
}

/// Why a read loop returned.
#[derive(Debug)]
pub enum ReadExit {
    /// Peer closed the stream (EOF)
    PeerClosed,

    /// The handler asked to stop
    Stopped,

    /// Transport failure
    Failed(io::Error),
}

/// Read until EOF, failure, or the handler asks to stop.
pub fn run_read_loop<C, R, H>(
    reader: &mut R,
    parser: &mut ProtocolParser<C>,
    handler: &mut H,
) -> ReadExit
where
    C: MessageCodec,
    R: Read + ?Sized,
    H: ReadLoopHandler<C::Message>,
{
    loop {
        if handler.should_stop() {
            return ReadExit::Stopped;
        }
        match parser.read_from(reader, handler) {
            Ok(ReadOutcome::Data(_)) | Ok(ReadOutcome::Retry) => {}
            Ok(ReadOutcome::TimedOut) => {
                if !handler.should_stop() {
                    handler.on_read_timeout();
                }
            }
            Ok(ReadOutcome::Closed) => {
                return if handler.should_stop() {
                    ReadExit::Stopped
                } else {
                    ReadExit::PeerClosed
                };
            }
            Err(e) => {
                return if handler.should_stop() {
                    ReadExit::Stopped
                } else {
                    ReadExit::Failed(e)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawCodec;
    use crate::config::WireConfig;
    use crate::protocol::Frame;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays scripted read results.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[derive(Default)]
    struct Events {
        log: Vec<String>,
        stop_after_timeouts: Option<usize>,
        timeouts: usize,
    }

    impl FrameHandler<Vec<u8>> for Events {
        fn on_heartbeat(&mut self) {
            self.log.push("heartbeat".into());
        }

        fn on_message(&mut self, topic: &str, _message: Vec<u8>) {
            self.log.push(format!("data:{}", topic));
        }
    }

    impl ReadLoopHandler<Vec<u8>> for Events {
        fn on_read_timeout(&mut self) {
            self.timeouts += 1;
            self.log.push("timeout".into());
        }

        fn should_stop(&self) -> bool {
            self.stop_after_timeouts
                .is_some_and(|limit| self.timeouts >= limit)
        }
    }

    fn data(topic: &str) -> Vec<u8> {
        Frame::Data {
            topic: topic.into(),
            payload: vec![1],
        }
        .to_bytes()
        .unwrap()
    }

    fn timeout() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"))
    }

    #[test]
    fn test_timeout_then_resume_then_eof() {
        let frame = data("a");
        let mut script = Script(VecDeque::from(vec![
            Ok(frame[..3].to_vec()),
            timeout(),
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok(frame[3..].to_vec()),
            Ok(vec![1]),
        ]));
        let mut parser = ProtocolParser::new(Arc::new(RawCodec), &WireConfig::default());
        let mut events = Events::default();

        let exit = run_read_loop(&mut script, &mut parser, &mut events);
        assert!(matches!(exit, ReadExit::PeerClosed));
        assert_eq!(events.log, vec!["timeout", "data:a", "heartbeat"]);
    }

    #[test]
    fn test_io_error_ends_loop() {
        let mut script = Script(VecDeque::from(vec![Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        ))]));
        let mut parser = ProtocolParser::new(Arc::new(RawCodec), &WireConfig::default());
        let mut events = Events::default();

        match run_read_loop(&mut script, &mut parser, &mut events) {
            ReadExit::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected exit {:?}", other),
        }
    }

    #[test]
    fn test_stop_requested() {
        let mut script = Script(VecDeque::from(vec![timeout(), timeout(), timeout()]));
        let mut parser = ProtocolParser::new(Arc::new(RawCodec), &WireConfig::default());
        let mut events = Events {
            stop_after_timeouts: Some(2),
            ..Default::default()
        };

        let exit = run_read_loop(&mut script, &mut parser, &mut events);
        assert!(matches!(exit, ReadExit::Stopped));
        assert_eq!(events.timeouts, 2);
    }
}
