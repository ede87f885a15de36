// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffered single-writer outbound sink.
//!
//! Callers on any thread encode frames into a pending buffer; the actual
//! socket write happens on the connection's writer fiber. Frames are written
//! in enqueue order and never interleave, because only the fiber touches the
//! socket.
//!
//! ```text
//!  enqueue() --> [pending Vec<u8>] --(one flush task in flight)--> fiber --> write_all()
//! ```

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::stats::WireStats;

pub type WriteErrorCallback = Box<dyn Fn(&io::Error) + Send + Sync + 'static>;

/// Handle to a connection's outbound byte stream. Cheap to clone.
#[derive(Clone)]
pub struct Outbound {
    fiber: Arc<dyn Fiber>,
    shared: Arc<Shared>,
}

struct Shared {
    pending: Mutex<Vec<u8>>,
    flush_scheduled: AtomicBool,
    closed: AtomicBool,
    sink: Mutex<SinkState>,
    stats: Arc<WireStats>,
    on_error: WriteErrorCallback,
}

struct SinkState {
    writer: Box<dyn Write + Send>,
    spare: Vec<u8>,
}

impl Outbound {
    pub fn new(
        fiber: Arc<dyn Fiber>,
        writer: Box<dyn Write + Send>,
        stats: Arc<WireStats>,
        on_error: WriteErrorCallback,
    ) -> Self {
        Self {
            fiber,
            shared: Arc::new(Shared {
                pending: Mutex::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                sink: Mutex::new(SinkState {
                    writer,
                    spare: Vec::new(),
                }),
                stats,
                on_error,
            }),
        }
    }

    /// Queue already-encoded frame bytes.
    pub fn enqueue(&self, frame: &[u8]) -> Result<()> {
        self.enqueue_with(|buf| {
            buf.extend_from_slice(frame);
            Ok(())
        })
    }

    /// Encode a frame directly into the pending buffer.
    ///
    /// `encode` must append a whole frame or nothing (the frame encoders
    /// truncate on failure).
    pub fn enqueue_with<F>(&self, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        {
            let mut pending = self.shared.pending.lock();
            encode(&mut pending)?;
        }
        self.shared.stats.record_frame_out();
        self.schedule_flush();
        Ok(())
    }

    /// Write everything pending right now. Must run on the writer fiber.
    pub fn flush_pending(&self) -> io::Result<usize> {
        self.shared.flush()
    }

    /// Stop accepting frames; bytes not yet flushed are discarded.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.pending.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Bytes waiting for the next flush.
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.fiber.execute(Box::new(move || {
            if let Err(e) = shared.flush() {
                log::debug!("[outbound] write failed: {}", e);
            }
        }));
    }
}

impl Shared {
    fn flush(&self) -> io::Result<usize> {
        // cleared before draining so frames enqueued during the write schedule another flush
        self.flush_scheduled.store(false, Ordering::Release);
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }

        let mut sink = self.sink.lock();
        let SinkState { writer, spare } = &mut *sink;
        {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(0);
            }
            std::mem::swap(&mut *pending, spare);
        }

        let result = writer.write_all(spare).and_then(|()| writer.flush());
        let written = spare.len();
        spare.clear();

        match result {
            Ok(()) => {
                self.stats.record_bytes_out(written);
                Ok(written)
            }
            Err(e) => {
                if !self.closed.swap(true, Ordering::AcqRel) {
                    self.pending.lock().clear();
                    (self.on_error)(&e);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("pending_bytes", &self.pending_bytes())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory sink for writer tests.

    use super::*;

    /// Shared capture buffer with optional failure injection.
    #[derive(Clone, Default)]
    pub struct CaptureSink {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub writes: Arc<Mutex<usize>>,
        pub fail: Arc<AtomicBool>,
    }

    impl Write for CaptureSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected"));
            }
            *self.writes.lock() += 1;
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::CaptureSink;
    use super::*;
    use crate::codec::Utf8Codec;
    use crate::fiber::ThreadFiber;
    use crate::protocol::frame::{self, Frame};
    use crossbeam::channel;
    use std::time::Duration;

    fn setup() -> (Arc<ThreadFiber>, CaptureSink, Outbound, channel::Receiver<String>) {
        let fiber = Arc::new(ThreadFiber::spawn("test-writer").unwrap());
        let sink = CaptureSink::default();
        let (tx, rx) = channel::unbounded();
        let outbound = Outbound::new(
            fiber.clone(),
            Box::new(sink.clone()),
            Arc::new(WireStats::default()),
            Box::new(move |e: &io::Error| {
                let _ = tx.send(e.to_string());
            }),
        );
        (fiber, sink, outbound, rx)
    }

    fn settle(fiber: &ThreadFiber) {
        let (tx, rx) = channel::bounded(1);
        fiber.execute(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_frames_written_in_order() {
        let (fiber, sink, outbound, _rx) = setup();
        let mut expected = Vec::new();
        for i in 0..50 {
            let msg = format!("m{}", i);
            frame::encode_message(&Utf8Codec, "t", &msg, &mut expected).unwrap();
            outbound
                .enqueue_with(|buf| frame::encode_message(&Utf8Codec, "t", &msg, buf))
                .unwrap();
        }
        settle(&fiber);
        assert_eq!(*sink.written.lock(), expected);
        assert_eq!(outbound.pending_bytes(), 0);
    }

    #[test]
    fn test_burst_coalesces_into_few_writes() {
        let (fiber, sink, outbound, _rx) = setup();
        // hold the fiber so every enqueue lands in one pending buffer
        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        fiber.execute(Box::new(move || {
            let _ = gate_rx.recv();
        }));
        for _ in 0..10 {
            outbound.enqueue(&Frame::Heartbeat.to_bytes().unwrap()).unwrap();
        }
        gate_tx.send(()).unwrap();
        settle(&fiber);
        assert_eq!(*sink.written.lock(), vec![1u8; 10]);
        assert_eq!(*sink.writes.lock(), 1);
    }

    #[test]
    fn test_failed_encode_enqueues_nothing() {
        let (fiber, sink, outbound, _rx) = setup();
        let long = "x".repeat(300);
        let err = outbound
            .enqueue_with(|buf| frame::encode_subscribe(&long, buf))
            .unwrap_err();
        assert!(matches!(err, Error::TopicTooLong(300)));
        settle(&fiber);
        assert!(sink.written.lock().is_empty());
    }

    #[test]
    fn test_write_error_closes_and_reports_once() {
        let (fiber, sink, outbound, rx) = setup();
        sink.fail.store(true, Ordering::SeqCst);
        outbound.enqueue(&[1]).unwrap();
        settle(&fiber);

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(outbound.is_closed());
        assert!(matches!(outbound.enqueue(&[1]), Err(Error::Closed)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flush_pending_on_fiber() {
        let (fiber, sink, outbound, _rx) = setup();
        let (tx, rx) = channel::bounded(1);
        let ob = outbound.clone();
        let s = sink.clone();
        fiber.execute(Box::new(move || {
            ob.enqueue(&[2]).unwrap();
            let n = ob.flush_pending().unwrap();
            let _ = tx.send((n, s.written.lock().clone()));
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (1, vec![2]));
        settle(&fiber);
        assert_eq!(*sink.written.lock(), vec![2]);
    }
}
