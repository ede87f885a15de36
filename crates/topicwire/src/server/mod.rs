// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging server.
//!
//! # Architecture
//!
//! ```text
//!                    +-----------------+
//!   accept() ------> | acceptor thread |---- Session::open
//!                    +-----------------+          |
//!                                                 v
//!   per session:  [reader thread] --subscribe/unsubscribe--> [hub fiber]
//!                       |                                        |
//!                  on_message / on_request              registry + Broadcaster
//!                                                                |
//!   Server::publish() ------------------------------------------+
//!                                                                |
//!                        [writer fiber] <--- Outbound::enqueue --+
//! ```
//!
//! The hub fiber is the single context that mutates the session registry and
//! every subscription set, and the only one that runs broadcasts.

pub mod broadcast;
pub mod listener;
pub mod session;

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel;
use parking_lot::Mutex;

use crate::codec::MessageCodec;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::fiber::{Fiber, ThreadFiber};
use crate::protocol::{frame, ProtocolParser};
use crate::transport::{run_read_loop, socket, ReadExit};

pub use broadcast::{BroadcastStats, Broadcaster, FanoutTarget};
pub use listener::ServerListener;
pub use session::{Replier, Session, SessionCloseReason, SessionId};

use listener::dispatch;
use session::SessionHandler;

const LISTEN_BACKLOG: i32 = 128;
const HUB_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry and broadcast state, touched only from hub tasks.
struct Hub<C: MessageCodec> {
    sessions: BTreeMap<SessionId, Arc<Session<C>>>,
    broadcaster: Broadcaster,
}

struct ServerShared<C: MessageCodec> {
    config: ServerConfig,
    codec: Arc<C>,
    listener: Arc<dyn ServerListener<C>>,
    hub: Arc<ThreadFiber>,
    state: Mutex<Hub<C>>,
    running: AtomicBool,
    next_id: AtomicU64,
    local_addr: SocketAddr,
}

/// Topic pub/sub and request/reply server.
pub struct Server<C: MessageCodec> {
    shared: Arc<ServerShared<C>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl<C: MessageCodec> Server<C> {
    /// Bind the listener and start accepting connections.
    pub fn bind<L>(config: ServerConfig, codec: C, listener: L) -> Result<Self>
    where
        L: ServerListener<C>,
    {
        config.validate()?;
        let tcp = socket::listen(config.socket_addr(), LISTEN_BACKLOG)?;
        let local_addr = tcp.local_addr()?;
        let hub = Arc::new(ThreadFiber::spawn("topicwire-hub")?);

        let shared = Arc::new(ServerShared {
            config,
            codec: Arc::new(codec),
            listener: Arc::new(listener),
            hub,
            state: Mutex::new(Hub {
                sessions: BTreeMap::new(),
                broadcaster: Broadcaster::new(),
            }),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            local_addr,
        });

        let accept_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name("topicwire-acceptor".into())
            .spawn(move || accept_loop(accept_shared, tcp))
            .map_err(|source| Error::Spawn {
                name: "topicwire-acceptor".into(),
                source,
            })?;

        log::info!("[server] listening on {}", local_addr);
        Ok(Self {
            shared,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Broadcast to every session subscribed to `topic`.
    ///
    /// Returns once the publish is queued on the hub; encoding happens there,
    /// once, and only if some session is subscribed.
    pub fn publish(&self, topic: &str, message: C::Message) -> Result<()> {
        frame::check_topic(topic)?;
        if !self.is_running() {
            return Err(Error::Closed);
        }
        let shared = Arc::clone(&self.shared);
        let topic = topic.to_string();
        self.shared.hub.execute(Box::new(move || {
            shared.broadcast(&topic, &message);
        }));
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    pub fn sessions(&self) -> Vec<Arc<Session<C>>> {
        self.shared.state.lock().sessions.values().cloned().collect()
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session<C>>> {
        self.shared.state.lock().sessions.get(&id).cloned()
    }

    /// Send Disconnect to a session and close it. Returns `false` if unknown.
    pub fn disconnect(&self, id: SessionId) -> bool {
        match self.session(id) {
            Some(session) => {
                session.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.shared.state.lock().broadcaster.stats()
    }

    /// Stop accepting, close every session, and stop the hub.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.acceptor.lock().take() {
            let _ = handle.join();
        }
        self.shared.settle_hub();

        let sessions: Vec<_> = {
            let mut state = self.shared.state.lock();
            std::mem::take(&mut state.sessions).into_values().collect()
        };
        for session in &sessions {
            session.close(SessionCloseReason::Shutdown);
            if session.retire() {
                let reason = session
                    .close_reason()
                    .unwrap_or(SessionCloseReason::Shutdown);
                dispatch(&*self.shared.listener, Some(session), || {
                    self.shared.listener.on_session_closed(session, &reason)
                });
            }
        }

        self.shared.hub.dispose();
        log::info!(
            "[server] {} shut down ({} session(s) closed)",
            self.shared.local_addr,
            sessions.len()
        );
    }
}

impl<C: MessageCodec> Drop for Server<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: MessageCodec> std::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.shared.local_addr)
            .field("running", &self.is_running())
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl<C: MessageCodec> ServerShared<C> {
    /// Wait until every task already queued on the hub has run.
    fn settle_hub(&self) {
        if self.hub.is_current() {
            return;
        }
        let (tx, rx) = channel::bounded(1);
        self.hub.execute(Box::new(move || {
            let _ = tx.send(());
        }));
        if rx.recv_timeout(HUB_SETTLE_TIMEOUT).is_err() {
            log::warn!("[server] hub did not settle within {:?}", HUB_SETTLE_TIMEOUT);
        }
    }

    /// Runs on the hub fiber.
    fn broadcast(&self, topic: &str, message: &C::Message) {
        let result = {
            let mut state = self.state.lock();
            let Hub {
                sessions,
                broadcaster,
            } = &mut *state;
            broadcaster.publish(&*self.codec, topic, message, sessions.values())
        };
        if let Err(e) = result {
            log::warn!("[server] broadcast on '{}' failed: {}", topic, e);
            dispatch(&*self.listener, None, || self.listener.on_error(None, &e));
        }
    }

    fn open_session(self: &Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        socket::configure_stream(&stream, &self.config.wire)?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Session::open(
            id,
            remote_addr,
            &stream,
            Arc::clone(&self.codec),
            Arc::clone(&self.listener),
            Arc::clone(&self.hub),
            &self.config.wire,
        )?;

        // registered before the reader starts, so its subscribe tasks find it
        let shared = Arc::clone(self);
        let registered = Arc::clone(&session);
        self.hub.execute(Box::new(move || {
            shared
                .state
                .lock()
                .sessions
                .insert(registered.id(), Arc::clone(&registered));
            dispatch(&*shared.listener, Some(&registered), || {
                shared.listener.on_session_opened(&registered)
            });
        }));

        let shared = Arc::clone(self);
        let reader_session = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name(format!("topicwire-reader-{}", id.as_u64()))
            .spawn(move || shared.read_session(reader_session, stream));

        if let Err(source) = spawned {
            session.close(SessionCloseReason::ReadError(source.to_string()));
            self.retire(session);
            return Err(Error::Spawn {
                name: format!("topicwire-reader-{}", id.as_u64()),
                source,
            });
        }
        Ok(())
    }

    /// Reader thread body.
    fn read_session(self: Arc<Self>, session: Arc<Session<C>>, mut stream: TcpStream) {
        let mut parser = ProtocolParser::with_stats(
            Arc::clone(&self.codec),
            &self.config.wire,
            session.stats_handle(),
        );
        let mut handler = SessionHandler::new(Arc::clone(&session));

        let exit = run_read_loop(&mut stream, &mut parser, &mut handler);
        let reason = match exit {
            ReadExit::PeerClosed if session.is_logged_out() => SessionCloseReason::Logout,
            ReadExit::PeerClosed => SessionCloseReason::PeerClosed,
            ReadExit::Failed(_) if session.is_logged_out() => SessionCloseReason::Logout,
            ReadExit::Failed(e) => {
                log::debug!("[{}] read failed: {}", session.id(), e);
                let err = Error::Io(io::Error::new(e.kind(), e.to_string()));
                dispatch(&*self.listener, Some(&session), || {
                    self.listener.on_error(Some(&session), &err)
                });
                SessionCloseReason::ReadError(e.to_string())
            }
            ReadExit::Stopped => session
                .close_reason()
                .unwrap_or(SessionCloseReason::Shutdown),
        };

        session.close(reason);
        self.retire(session);
    }

    /// Drop a closed session from the registry and report it, on the hub.
    fn retire(self: &Arc<Self>, session: Arc<Session<C>>) {
        let shared = Arc::clone(self);
        self.hub.execute(Box::new(move || {
            if !session.retire() {
                return;
            }
            shared.state.lock().sessions.remove(&session.id());
            let reason = session
                .close_reason()
                .unwrap_or(SessionCloseReason::PeerClosed);
            log::info!("[{}] closed: {}", session.id(), reason);
            dispatch(&*shared.listener, Some(&session), || {
                shared.listener.on_session_closed(&session, &reason)
            });
        }));
    }
}

fn accept_loop<C: MessageCodec>(shared: Arc<ServerShared<C>>, listener: TcpListener) {
    let poll = shared.config.accept_poll_interval();
    log::debug!("[server] acceptor started (poll {:?})", poll);

    while shared.running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, remote_addr)) => {
                if let Err(e) = shared.open_session(stream, remote_addr) {
                    log::warn!("[server] cannot open session for {}: {}", remote_addr, e);
                    dispatch(&*shared.listener, None, || shared.listener.on_error(None, &e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("[server] accept failed: {}", e);
                thread::sleep(poll);
            }
        }
    }
    log::debug!("[server] acceptor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8Codec;

    #[test]
    fn test_bind_ephemeral_port() {
        let server = Server::bind(ServerConfig::localhost(), Utf8Codec, ()).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.is_running());
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn test_publish_validation() {
        let server = Server::bind(ServerConfig::localhost(), Utf8Codec, ()).unwrap();
        let long = "t".repeat(256);
        assert!(matches!(
            server.publish(&long, "x".into()),
            Err(Error::TopicTooLong(256))
        ));
        // nobody subscribed: queued, never encoded
        server.publish("prices", "100".into()).unwrap();
        server.shared.settle_hub();
        let stats = server.broadcast_stats();
        assert_eq!(stats.publishes, 1);
        assert_eq!(stats.encodes, 0);

        server.shutdown();
        server.shutdown();
        assert!(!server.is_running());
        assert!(matches!(server.publish("prices", "1".into()), Err(Error::Closed)));
    }

    #[test]
    fn test_disconnect_unknown_session() {
        let server = Server::bind(ServerConfig::localhost(), Utf8Codec, ()).unwrap();
        assert!(!server.disconnect(SessionId(42)));
        assert!(server.session(SessionId(42)).is_none());
    }
}
