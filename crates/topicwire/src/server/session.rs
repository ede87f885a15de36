// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side session.
//!
//! One session per accepted socket. It owns:
//! - the subscription set (mutated only on the server hub fiber)
//! - a writer fiber plus [`Outbound`] sink, the only path to the socket
//! - the outbound heartbeat timer
//!
//! [`SessionHandler`] is the parser callback target running on the session's
//! reader thread.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::codec::MessageCodec;
use crate::config::WireConfig;
use crate::error::{CodecError, Error, ProtocolError, Result};
use crate::fiber::{Fiber, ThreadFiber, TimerHandle};
use crate::protocol::{frame, FrameHandler};
use crate::server::broadcast::FanoutTarget;
use crate::server::listener::{dispatch, ServerListener};
use crate::stats::{WireStats, WireStatsSnapshot};
use crate::transport::{Outbound, ReadLoopHandler};

/// Opaque session identity, stable for the socket's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCloseReason {
    /// Client sent Disconnect before closing
    Logout,

    /// Client closed the socket without logging out
    PeerClosed,

    ReadError(String),

    WriteError(String),

    /// [`crate::Server::disconnect`] or [`Session::disconnect`]
    ServerDisconnect,

    /// Server shut down
    Shutdown,
}

impl SessionCloseReason {
    /// Expected shutdowns versus transport failures.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionCloseReason::ReadError(_) | SessionCloseReason::WriteError(_)
        )
    }
}

impl fmt::Display for SessionCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionCloseReason::Logout => write!(f, "logout"),
            SessionCloseReason::PeerClosed => write!(f, "peer closed"),
            SessionCloseReason::ReadError(e) => write!(f, "read error: {}", e),
            SessionCloseReason::WriteError(e) => write!(f, "write error: {}", e),
            SessionCloseReason::ServerDisconnect => write!(f, "disconnected by server"),
            SessionCloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One accepted client connection.
pub struct Session<C: MessageCodec> {
    id: SessionId,
    remote_addr: SocketAddr,
    codec: Arc<C>,
    listener: Arc<dyn ServerListener<C>>,
    hub: Arc<ThreadFiber>,
    writer: Arc<ThreadFiber>,
    outbound: Outbound,
    stream: TcpStream,
    subscriptions: Mutex<HashSet<String>>,
    logged_out: AtomicBool,
    closed: AtomicBool,
    retired: AtomicBool,
    close_reason: Mutex<Option<SessionCloseReason>>,
    heartbeat: Mutex<Option<TimerHandle>>,
    last_inbound: Mutex<Instant>,
    stats: Arc<WireStats>,
    opened_at: Instant,
}

impl<C: MessageCodec> Session<C> {
    /// Build a session around an accepted, already configured stream.
    pub(crate) fn open(
        id: SessionId,
        remote_addr: SocketAddr,
        stream: &TcpStream,
        codec: Arc<C>,
        listener: Arc<dyn ServerListener<C>>,
        hub: Arc<ThreadFiber>,
        wire: &WireConfig,
    ) -> Result<Arc<Self>> {
        let writer = Arc::new(ThreadFiber::spawn(format!("topicwire-writer-{}", id.0))?);
        let sink = stream.try_clone()?;
        let control = stream.try_clone()?;
        let stats = Arc::new(WireStats::default());

        let session = Arc::new_cyclic(|weak: &Weak<Session<C>>| {
            let weak = weak.clone();
            let outbound = Outbound::new(
                writer.clone(),
                Box::new(sink),
                Arc::clone(&stats),
                Box::new(move |e: &io::Error| {
                    if let Some(session) = weak.upgrade() {
                        session.on_write_error(e);
                    }
                }),
            );
            Session {
                id,
                remote_addr,
                codec,
                listener,
                hub,
                writer: Arc::clone(&writer),
                outbound,
                stream: control,
                subscriptions: Mutex::new(HashSet::new()),
                logged_out: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                retired: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                heartbeat: Mutex::new(None),
                last_inbound: Mutex::new(Instant::now()),
                stats,
                opened_at: Instant::now(),
            }
        });

        if let Some(interval) = wire.heartbeat_interval() {
            let outbound = session.outbound.clone();
            let handle = session.writer.schedule_repeating(
                interval,
                interval,
                Box::new(move || {
                    let _ = outbound.enqueue_with(|buf| {
                        frame::encode_heartbeat(buf);
                        Ok(())
                    });
                }),
            );
            *session.heartbeat.lock() = Some(handle);
        }

        log::info!("[{}] opened from {}", id, remote_addr);
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().contains(topic)
    }

    /// Snapshot of the subscription set.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<SessionCloseReason> {
        self.close_reason.lock().clone()
    }

    pub fn stats(&self) -> WireStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> Arc<WireStats> {
        Arc::clone(&self.stats)
    }

    pub fn connected_for(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Time since the last inbound frame or heartbeat.
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }

    /// Publish to this session only, regardless of its subscriptions.
    pub fn send(&self, topic: &str, message: &C::Message) -> Result<()> {
        self.outbound
            .enqueue_with(|buf| frame::encode_message(&*self.codec, topic, message, buf))
    }

    /// Server-initiated logout: send Disconnect, then close.
    pub fn disconnect(&self) {
        let _ = self.outbound.enqueue_with(|buf| {
            frame::encode_disconnect(buf);
            Ok(())
        });
        self.close(SessionCloseReason::ServerDisconnect);
    }

    /// Tear down the transport. Frames queued before this call are still
    /// written; the socket is shut down afterwards on the writer fiber.
    pub(crate) fn close(&self, reason: SessionCloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_reason.lock().get_or_insert(reason);
        if let Some(timer) = self.heartbeat.lock().take() {
            timer.cancel();
        }

        let outbound = self.outbound.clone();
        let writer = Arc::clone(&self.writer);
        match self.stream.try_clone() {
            Ok(stream) => self.writer.execute(Box::new(move || {
                if let Err(e) = outbound.flush_pending() {
                    log::debug!("[session] final flush failed: {}", e);
                }
                outbound.close();
                let _ = stream.shutdown(Shutdown::Both);
                writer.dispose();
            })),
            Err(e) => {
                log::debug!("[{}] cannot clone stream for shutdown: {}", self.id, e);
                self.outbound.close();
                let _ = self.stream.shutdown(Shutdown::Both);
                self.writer.execute(Box::new(move || writer.dispose()));
            }
        }
        log::debug!("[{}] closing", self.id);
    }

    /// Marks the session as removed from the registry. Returns `false` if it
    /// already was.
    pub(crate) fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn send_reply(&self, request_id: i32, topic: &str, message: &C::Message) -> Result<()> {
        self.outbound.enqueue_with(|buf| {
            frame::encode_reply(&*self.codec, request_id, topic, message, buf)
        })
    }

    fn on_write_error(self: &Arc<Self>, e: &io::Error) {
        log::debug!("[{}] write failed: {}", self.id, e);
        if !self.is_logged_out() && !self.is_closed() {
            let err = Error::Io(io::Error::new(e.kind(), e.to_string()));
            dispatch(&*self.listener, Some(self), || {
                self.listener.on_error(Some(self), &err)
            });
        }
        self.close(SessionCloseReason::WriteError(e.to_string()));
    }

    fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }
}

impl<C: MessageCodec> FanoutTarget for Session<C> {
    fn is_subscribed(&self, topic: &str) -> bool {
        Session::is_subscribed(self, topic)
    }

    fn deliver(&self, frame: &[u8]) -> bool {
        self.outbound.enqueue(frame).is_ok()
    }
}

impl<C: MessageCodec> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("logged_out", &self.is_logged_out())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Reply capability
// ============================================================================

/// Answers one request on the session it arrived on.
///
/// Consumed by [`Replier::reply`], so a request is answered at most once.
pub struct Replier<C: MessageCodec> {
    session: Arc<Session<C>>,
    request_id: i32,
    topic: Arc<str>,
}

impl<C: MessageCodec> Replier<C> {
    pub(crate) fn new(session: Arc<Session<C>>, request_id: i32, topic: Arc<str>) -> Self {
        Self {
            session,
            request_id,
            topic,
        }
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn session(&self) -> &Arc<Session<C>> {
        &self.session
    }

    /// Send the reply, reusing the request's id and topic.
    pub fn reply(self, message: &C::Message) -> Result<()> {
        self.session.send_reply(self.request_id, &self.topic, message)
    }
}

impl<C: MessageCodec> fmt::Debug for Replier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replier")
            .field("session", &self.session.id)
            .field("request_id", &self.request_id)
            .field("topic", &self.topic)
            .finish()
    }
}

// ============================================================================
// Parser callbacks
// ============================================================================

/// Parser callback target for one session's reader thread.
pub(crate) struct SessionHandler<C: MessageCodec> {
    session: Arc<Session<C>>,
}

impl<C: MessageCodec> SessionHandler<C> {
    pub(crate) fn new(session: Arc<Session<C>>) -> Self {
        Self { session }
    }

    fn notify<F: FnOnce()>(&self, callback: F) {
        dispatch(&*self.session.listener, Some(&self.session), callback);
    }

    fn report(&self, error: Error) {
        let session = &self.session;
        if session.is_logged_out() {
            log::debug!("[{}] not reporting after logout: {}", session.id, error);
            return;
        }
        self.notify(|| session.listener.on_error(Some(session), &error));
    }
}

impl<C: MessageCodec> FrameHandler<C::Message> for SessionHandler<C> {
    fn on_heartbeat(&mut self) {
        self.session.touch();
        log::trace!("[{}] heartbeat", self.session.id);
    }

    fn on_logout(&mut self) {
        let session = &self.session;
        session.touch();
        session.logged_out.store(true, Ordering::Release);
        let _ = session.outbound.enqueue_with(|buf| {
            frame::encode_disconnect(buf);
            Ok(())
        });
        log::debug!("[{}] logout", session.id);
        self.notify(|| session.listener.on_logout(session));
    }

    fn on_subscribe(&mut self, topic: &str) {
        self.session.touch();
        let session = Arc::clone(&self.session);
        let topic = topic.to_string();
        self.session.hub.execute(Box::new(move || {
            session.subscriptions.lock().insert(topic.clone());
            log::debug!("[{}] subscribed to '{}'", session.id, topic);
            dispatch(&*session.listener, Some(&session), || {
                session.listener.on_subscribe(&session, &topic)
            });
        }));
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        self.session.touch();
        let session = Arc::clone(&self.session);
        let topic = topic.to_string();
        self.session.hub.execute(Box::new(move || {
            session.subscriptions.lock().remove(&topic);
            log::debug!("[{}] unsubscribed from '{}'", session.id, topic);
            dispatch(&*session.listener, Some(&session), || {
                session.listener.on_unsubscribe(&session, &topic)
            });
        }));
    }

    fn on_message(&mut self, topic: &str, message: C::Message) {
        let session = &self.session;
        session.touch();
        self.notify(|| session.listener.on_message(session, topic, message));
    }

    fn on_request(&mut self, request_id: i32, topic: &str, message: C::Message) {
        let session = &self.session;
        session.touch();
        let replier = Replier::new(Arc::clone(session), request_id, Arc::from(topic));
        self.notify(|| session.listener.on_request(session, topic, message, replier));
    }

    fn on_reply(&mut self, request_id: i32, topic: &str, _message: C::Message) {
        self.session.touch();
        log::debug!(
            "[{}] ignoring reply {} on '{}': server sends no requests",
            self.session.id,
            request_id,
            topic
        );
    }

    fn on_raw_frame(&mut self, topic: &str, frame: &[u8]) {
        let session = &self.session;
        session.touch();
        self.notify(|| session.listener.on_raw_frame(session, topic, frame));
    }

    fn on_decode_error(&mut self, error: CodecError) {
        log::debug!("[{}] {}", self.session.id, error);
        self.report(Error::Codec(error));
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        log::debug!("[{}] protocol error: {}", self.session.id, error);
        self.report(Error::Protocol(error));
    }
}

impl<C: MessageCodec> ReadLoopHandler<C::Message> for SessionHandler<C> {
    fn on_read_timeout(&mut self) {
        let session = &self.session;
        log::debug!("[{}] read timeout after {:?}", session.id, session.idle_for());
        self.notify(|| session.listener.on_read_timeout(session));
    }

    fn should_stop(&self) -> bool {
        self.session.is_closed()
    }
}
