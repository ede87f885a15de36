// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serialize-once fan-out.
//!
//! A publish walks the session collection; the first subscribed session
//! triggers the one and only encode into a shared buffer, and every
//! subscribed session (that one included) receives a copy of the same bytes.
//! With no subscribers the codec is never called.
//!
//! The broadcaster is owned by the server hub fiber, which is also the only
//! context that mutates subscription sets, so a publish sees one consistent
//! snapshot.

use std::sync::Arc;

use crate::codec::MessageCodec;
use crate::error::Result;
use crate::protocol::frame;

/// Something a broadcast can be delivered to.
pub trait FanoutTarget {
    fn is_subscribed(&self, topic: &str) -> bool;

    /// Queue encoded frame bytes. Returns `false` if the target is gone.
    fn deliver(&self, frame: &[u8]) -> bool;
}

impl<T: FanoutTarget + ?Sized> FanoutTarget for Arc<T> {
    fn is_subscribed(&self, topic: &str) -> bool {
        (**self).is_subscribed(topic)
    }

    fn deliver(&self, frame: &[u8]) -> bool {
        (**self).deliver(frame)
    }
}

/// Counters for one broadcaster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub publishes: u64,
    pub encodes: u64,
    pub deliveries: u64,
}

/// Fan-out engine with a reusable encode buffer.
#[derive(Debug, Default)]
pub struct Broadcaster {
    buffer: Vec<u8>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `message` at most once and deliver it to every subscribed target.
    ///
    /// Returns the number of targets that accepted the frame.
    pub fn publish<'a, C, T, I>(
        &mut self,
        codec: &C,
        topic: &str,
        message: &C::Message,
        targets: I,
    ) -> Result<usize>
    where
        C: MessageCodec,
        T: FanoutTarget + 'a + ?Sized,
        I: IntoIterator<Item = &'a T>,
    {
        self.stats.publishes += 1;
        self.buffer.clear();
        let mut encoded = false;
        let mut delivered = 0;

        for target in targets {
            if !target.is_subscribed(topic) {
                continue;
            }
            if !encoded {
                frame::encode_message(codec, topic, message, &mut self.buffer)?;
                self.stats.encodes += 1;
                encoded = true;
            }
            if target.deliver(&self.buffer) {
                delivered += 1;
            }
        }

        self.stats.deliveries += delivered as u64;
        log::trace!(
            "[broadcast] topic '{}' delivered to {} session(s)",
            topic,
            delivered
        );
        Ok(delivered)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, Error};
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Codec that counts encode calls.
    #[derive(Default)]
    struct CountingCodec {
        encodes: AtomicUsize,
    }

    impl MessageCodec for CountingCodec {
        type Message = String;

        fn encode(&self, _topic: &str, message: &String, out: &mut Vec<u8>) -> std::result::Result<(), CodecError> {
            self.encodes.fetch_add(1, Ordering::SeqCst);
            out.extend_from_slice(message.as_bytes());
            Ok(())
        }

        fn decode(&self, _topic: &str, bytes: &[u8]) -> std::result::Result<String, CodecError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    struct FakeSession {
        topics: Vec<&'static str>,
        received: RefCell<Vec<Vec<u8>>>,
        alive: bool,
    }

    impl FakeSession {
        fn new(topics: Vec<&'static str>) -> Self {
            Self {
                topics,
                received: RefCell::new(Vec::new()),
                alive: true,
            }
        }
    }

    impl FanoutTarget for FakeSession {
        fn is_subscribed(&self, topic: &str) -> bool {
            self.topics.iter().any(|t| *t == topic)
        }

        fn deliver(&self, frame: &[u8]) -> bool {
            if self.alive {
                self.received.borrow_mut().push(frame.to_vec());
            }
            self.alive
        }
    }

    fn expected_frame(topic: &str, msg: &str) -> Vec<u8> {
        let mut out = Vec::new();
        frame::encode_message(&CountingCodec::default(), topic, &msg.to_string(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_single_encode_for_n_subscribers() {
        for n in [0usize, 1, 100] {
            let codec = CountingCodec::default();
            let sessions: Vec<FakeSession> = (0..n).map(|_| FakeSession::new(vec!["prices"])).collect();
            let mut engine = Broadcaster::new();

            let delivered = engine
                .publish(&codec, "prices", &"100".to_string(), &sessions)
                .unwrap();

            assert_eq!(delivered, n);
            assert_eq!(codec.encodes.load(Ordering::SeqCst), usize::from(n > 0));
            let expected = expected_frame("prices", "100");
            for s in &sessions {
                assert_eq!(*s.received.borrow(), vec![expected.clone()]);
            }
        }
    }

    #[test]
    fn test_unsubscribed_sessions_skipped() {
        let codec = CountingCodec::default();
        let sessions = vec![
            FakeSession::new(vec!["other"]),
            FakeSession::new(vec!["prices", "other"]),
            FakeSession::new(vec![]),
            FakeSession::new(vec!["prices"]),
        ];
        let mut engine = Broadcaster::new();

        let delivered = engine
            .publish(&codec, "prices", &"1".to_string(), &sessions)
            .unwrap();
        assert_eq!(delivered, 2);
        assert!(sessions[0].received.borrow().is_empty());
        assert!(sessions[2].received.borrow().is_empty());
        assert_eq!(sessions[1].received.borrow().len(), 1);

        engine
            .publish(&codec, "nobody", &"2".to_string(), &sessions)
            .unwrap();
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.stats(),
            BroadcastStats {
                publishes: 2,
                encodes: 1,
                deliveries: 2
            }
        );
    }

    #[test]
    fn test_dead_target_not_counted() {
        let codec = CountingCodec::default();
        let mut dead = FakeSession::new(vec!["t"]);
        dead.alive = false;
        let sessions = vec![dead, FakeSession::new(vec!["t"])];
        let mut engine = Broadcaster::new();
        assert_eq!(
            engine.publish(&codec, "t", &"x".to_string(), &sessions).unwrap(),
            1
        );
    }

    #[test]
    fn test_buffer_reused_between_publishes() {
        let codec = CountingCodec::default();
        let sessions = vec![FakeSession::new(vec!["a", "b"])];
        let mut engine = Broadcaster::new();
        engine.publish(&codec, "a", &"long message".to_string(), &sessions).unwrap();
        engine.publish(&codec, "b", &"s".to_string(), &sessions).unwrap();
        assert_eq!(
            sessions[0].received.borrow()[1],
            expected_frame("b", "s")
        );
    }

    #[test]
    fn test_topic_too_long_only_when_subscribed() {
        let codec = CountingCodec::default();
        let long = "x".repeat(256);
        let mut engine = Broadcaster::new();

        let none: Vec<FakeSession> = Vec::new();
        assert_eq!(engine.publish(&codec, &long, &"m".to_string(), &none).unwrap(), 0);

        struct Everything;
        impl FanoutTarget for Everything {
            fn is_subscribed(&self, _topic: &str) -> bool {
                true
            }
            fn deliver(&self, _frame: &[u8]) -> bool {
                true
            }
        }
        let err = engine
            .publish(&codec, &long, &"m".to_string(), &[Everything])
            .unwrap_err();
        assert!(matches!(err, Error::TopicTooLong(256)));
    }
}
