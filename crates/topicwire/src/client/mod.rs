// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging client with automatic reconnection.
//!
//! # Architecture
//!
//! ```text
//!  Client API (any thread)
//!      |  subscribe / publish / request / close
//!      v
//!  [client fiber]  connect, replay subscriptions, heartbeats, flushes,
//!      |           reply and timeout callbacks, reconnect timer
//!      v
//!   socket  --> [reader thread] --ProtocolParser--> subscriber callbacks
//!                                                   correlator.complete()
//! ```
//!
//! Every connection gets a fresh epoch. Loss notifications carry the epoch
//! they were raised for, so a late failure from a previous socket never tears
//! down its replacement.

pub mod connection;
pub mod correlator;
pub mod listener;
pub mod subscriptions;

use std::collections::HashSet;
use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::codec::MessageCodec;
use crate::config::ClientConfig;
use crate::error::{self, CodecError, Error, ProtocolError, Result};
use crate::fiber::{Fiber, ThreadFiber, TimerHandle};
use crate::protocol::{frame, FrameHandler, ProtocolParser};
use crate::stats::{WireStats, WireStatsSnapshot};
use crate::transport::{run_read_loop, socket, Outbound, ReadExit, ReadLoopHandler};

pub use connection::ConnectionState;
pub use correlator::{PendingRequest, RequestEnd, RequestTimeout};
pub use listener::{ClientListener, CloseReason};
pub use subscriptions::SubscriberFn;

use connection::StateCell;
use correlator::{Correlator, ErrorSink};
use subscriptions::SubscriptionTable;

/// The live socket of one connection epoch.
struct Link {
    epoch: u64,
    stream: TcpStream,
    outbound: Outbound,
    heartbeat: Option<TimerHandle>,
    logout_ack: Receiver<bool>,
    stopped: Arc<AtomicBool>,
}

#[derive(Default)]
struct CloseSlot {
    reason: Option<CloseReason>,
    waiters: Vec<Sender<CloseReason>>,
}

struct Inner<C: MessageCodec> {
    addr: SocketAddr,
    config: ClientConfig,
    codec: Arc<C>,
    listener: Arc<dyn ClientListener>,
    fiber: Arc<ThreadFiber>,
    state: StateCell,
    subscriptions: SubscriptionTable<C::Message>,
    correlator: Correlator<C::Message>,
    link: Mutex<Option<Link>>,
    /// Topics subscribed on the current link; touched only on the fiber.
    wire_topics: Mutex<HashSet<String>>,
    epoch: AtomicU64,
    retry: Mutex<Option<TimerHandle>>,
    closing: Mutex<CloseSlot>,
    stats: Arc<WireStats>,
}

/// Topic pub/sub and request/reply client.
///
/// # Example
///
/// ```rust,no_run
/// use topicwire::{Client, ClientConfig, Utf8Codec};
/// use std::time::Duration;
///
/// # fn example() -> topicwire::Result<()> {
/// let client = Client::connect("127.0.0.1:7400".parse().unwrap(), ClientConfig::default(), Utf8Codec, ())?;
/// let _prices = client.subscribe("prices", |price: &String| println!("price {}", price))?;
/// client.request(
///     "echo",
///     &"hi".to_string(),
///     |reply| println!("reply {}", reply),
///     |timeout| println!("request {} ended: {:?}", timeout.request_id(), timeout.cause()),
///     Duration::from_secs(1),
/// )?;
/// let reason = client.close(true).recv();
/// # let _ = reason;
/// # Ok(())
/// # }
/// ```
pub struct Client<C: MessageCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: MessageCodec> Client<C> {
    /// Start the connection manager. The first attempt runs after the
    /// configured initial delay; failures are retried per the reconnect delay.
    pub fn connect<L>(addr: SocketAddr, config: ClientConfig, codec: C, listener: L) -> Result<Self>
    where
        L: ClientListener,
    {
        config.validate()?;
        let fiber = Arc::new(ThreadFiber::spawn("topicwire-client")?);
        let listener: Arc<dyn ClientListener> = Arc::new(listener);

        let sink_listener = Arc::clone(&listener);
        let report: ErrorSink = Arc::new(move |e: &Error| {
            if error::guarded(|| sink_listener.on_error(e)).is_err() {
                log::warn!("[client] listener on_error panicked");
            }
        });

        let inner = Arc::new(Inner {
            addr,
            codec: Arc::new(codec),
            listener,
            correlator: Correlator::new(fiber.clone(), report),
            fiber,
            state: StateCell::default(),
            subscriptions: SubscriptionTable::default(),
            link: Mutex::new(None),
            wire_topics: Mutex::new(HashSet::new()),
            epoch: AtomicU64::new(0),
            retry: Mutex::new(None),
            closing: Mutex::new(CloseSlot::default()),
            stats: Arc::new(WireStats::default()),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let delay = inner.config.initial_connect_delay();
        if delay.is_zero() {
            inner.fiber.execute(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.attempt_connect();
                }
            }));
        } else {
            let timer = inner.fiber.schedule(
                delay,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.attempt_connect();
                    }
                }),
            );
            *inner.retry.lock() = Some(timer);
        }

        log::debug!("[client] started for {}", addr);
        Ok(Self { inner })
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_operational()
    }

    /// Counters accumulated across every connection of this client.
    pub fn stats(&self) -> WireStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Topics with at least one local subscriber.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.subscriptions.topics()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Register a local subscriber.
    ///
    /// The first subscriber on a topic sends a wire Subscribe (now, or on the
    /// next connect). Dropping the returned handle detaches it; the last one
    /// leaving sends Unsubscribe.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Result<Subscription<C>>
    where
        F: Fn(&C::Message) + Send + Sync + 'static,
    {
        frame::check_topic(topic)?;
        if self.state().is_shutting_down() {
            return Err(Error::Closed);
        }
        let (id, first) = self.inner.subscriptions.add(topic, Arc::new(callback));
        if first {
            self.inner.sync_wire(topic);
        }
        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
            detached: false,
        })
    }

    /// Send a Data frame. Fails with [`Error::NotConnected`] while no socket
    /// is up.
    pub fn publish(&self, topic: &str, message: &C::Message) -> Result<()> {
        frame::check_topic(topic)?;
        let outbound = self.inner.current_outbound()?;
        outbound.enqueue_with(|buf| frame::encode_message(&*self.inner.codec, topic, message, buf))
    }

    /// Send a request. Exactly one of `on_reply` and `on_timeout` runs, on the
    /// client fiber. A zero `timeout` waits indefinitely.
    pub fn request<R, T>(
        &self,
        topic: &str,
        message: &C::Message,
        on_reply: R,
        on_timeout: T,
        timeout: std::time::Duration,
    ) -> Result<PendingRequest>
    where
        R: FnOnce(C::Message) + Send + 'static,
        T: FnOnce(RequestTimeout) + Send + 'static,
    {
        frame::check_topic(topic)?;
        let outbound = self.inner.current_outbound()?;
        let request = self
            .inner
            .correlator
            .register(Box::new(on_reply), Box::new(on_timeout), timeout);

        let sent = outbound.enqueue_with(|buf| {
            frame::encode_request(&*self.inner.codec, request.id(), topic, message, buf)
        });
        if let Err(e) = sent {
            self.inner.correlator.discard(&request);
            return Err(e);
        }
        Ok(request)
    }

    /// Close the client. With `graceful`, a Disconnect is sent and the
    /// server's acknowledgement awaited up to the logout timeout.
    ///
    /// The receiver yields the final [`CloseReason`]; calling again returns
    /// the same reason.
    pub fn close(&self, graceful: bool) -> Receiver<CloseReason> {
        let (tx, rx) = channel::bounded(1);
        {
            let mut slot = self.inner.closing.lock();
            if let Some(reason) = &slot.reason {
                let _ = tx.send(reason.clone());
                return rx;
            }
            slot.waiters.push(tx);
        }
        if !self.inner.state.begin_close() {
            return rx;
        }
        if let Some(timer) = self.inner.retry.lock().take() {
            timer.cancel();
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .fiber
            .execute(Box::new(move || inner.shutdown(graceful)));
        rx
    }
}

impl<C: MessageCodec> Drop for Client<C> {
    fn drop(&mut self) {
        let _ = self.close(false);
    }
}

impl<C: MessageCodec> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.inner.addr)
            .field("state", &self.state())
            .field("topics", &self.inner.subscriptions.topics())
            .finish()
    }
}

/// Local subscription handle. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<C: MessageCodec> {
    inner: Weak<Inner<C>>,
    topic: String,
    id: u64,
    detached: bool,
}

impl<C: MessageCodec> Subscription<C> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop local delivery now; the wire Unsubscribe follows asynchronously.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if std::mem::replace(&mut self.detached, true) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.subscriptions.remove(&self.topic, self.id) == Some(true) {
            inner.sync_wire(&self.topic);
        }
    }
}

impl<C: MessageCodec> Drop for Subscription<C> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<C: MessageCodec> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Connection management (client fiber)
// ============================================================================

impl<C: MessageCodec> Inner<C> {
    fn notify<F: FnOnce()>(&self, callback: F) {
        if let Err(e) = error::guarded(callback) {
            log::warn!("[client] listener callback failed: {}", e);
            self.report(&e);
        }
    }

    fn report(&self, error: &Error) {
        if error::guarded(|| self.listener.on_error(error)).is_err() {
            log::warn!("[client] listener on_error panicked");
        }
    }

    fn current_outbound(&self) -> Result<Outbound> {
        if let Some(link) = self.link.lock().as_ref() {
            return Ok(link.outbound.clone());
        }
        if self.state.get().is_shutting_down() {
            Err(Error::Closed)
        } else {
            Err(Error::NotConnected)
        }
    }

    fn attempt_connect(self: &Arc<Self>) {
        *self.retry.lock() = None;
        if !self.state.advance(ConnectionState::Connecting) {
            return;
        }
        log::debug!("[client] connecting to {}", self.addr);

        let established = socket::connect(self.addr, self.config.connect_timeout())
            .and_then(|stream| {
                socket::configure_stream(&stream, &self.config.wire)?;
                Ok(stream)
            })
            .map_err(Error::from)
            .and_then(|stream| self.establish(stream));

        if let Err(e) = established {
            log::warn!("[client] connect to {} failed: {}", self.addr, e);
            if !self.state.advance(ConnectionState::Disconnected) {
                return;
            }
            let reason = CloseReason::ConnectFailed(e.to_string());
            self.notify(|| self.listener.on_disconnected(&reason));
            self.schedule_reconnect();
        }
    }

    /// Replay subscriptions, then start reading. Runs on the fiber.
    fn establish(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let sink = stream.try_clone()?;
        let mut reader = stream.try_clone()?;

        let weak = Arc::downgrade(self);
        let outbound = Outbound::new(
            self.fiber.clone(),
            Box::new(sink),
            Arc::clone(&self.stats),
            Box::new(move |e: &std::io::Error| {
                if let Some(inner) = weak.upgrade() {
                    inner.connection_lost(epoch, CloseReason::WriteError(e.to_string()));
                }
            }),
        );

        // the server forgot everything; replay before the reader can see pushes
        {
            let mut wire = self.wire_topics.lock();
            wire.clear();
            for topic in self.subscriptions.topics() {
                outbound.enqueue_with(|buf| frame::encode_subscribe(&topic, buf))?;
                wire.insert(topic);
            }
        }
        outbound.flush_pending()?;

        let heartbeat = self.config.wire.heartbeat_interval().map(|interval| {
            let beat = outbound.clone();
            self.fiber.schedule_repeating(
                interval,
                interval,
                Box::new(move || {
                    let _ = beat.enqueue_with(|buf| {
                        frame::encode_heartbeat(buf);
                        Ok(())
                    });
                }),
            )
        });

        let (ack_tx, ack_rx) = channel::bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));
        *self.link.lock() = Some(Link {
            epoch,
            stream,
            outbound,
            heartbeat,
            logout_ack: ack_rx,
            stopped: Arc::clone(&stopped),
        });

        if !self.state.advance(ConnectionState::Connected) {
            self.teardown_link();
            return Ok(());
        }

        let mut handler = ClientReadHandler {
            inner: Arc::clone(self),
            logout_ack: ack_tx,
            server_logout: false,
            stopped,
        };
        let mut parser =
            ProtocolParser::with_stats(Arc::clone(&self.codec), &self.config.wire, Arc::clone(&self.stats));
        let spawned = thread::Builder::new()
            .name(format!("topicwire-client-reader-{}", epoch))
            .spawn(move || {
                let exit = run_read_loop(&mut reader, &mut parser, &mut handler);
                handler.finish(epoch, exit);
            });

        if let Err(source) = spawned {
            self.teardown_link();
            self.state.advance(ConnectionState::Disconnected);
            return Err(Error::Spawn {
                name: format!("topicwire-client-reader-{}", epoch),
                source,
            });
        }

        log::info!("[client] connected to {} (epoch {})", self.addr, epoch);
        self.notify(|| self.listener.on_connected());
        Ok(())
    }

    /// Report a lost connection from any thread.
    fn connection_lost(self: &Arc<Self>, epoch: u64, reason: CloseReason) {
        let inner = Arc::clone(self);
        self.fiber
            .execute(Box::new(move || inner.handle_loss(epoch, reason)));
    }

    fn handle_loss(self: &Arc<Self>, epoch: u64, reason: CloseReason) {
        let current = self
            .link
            .lock()
            .as_ref()
            .is_some_and(|link| link.epoch == epoch);
        if !current || self.state.get().is_shutting_down() {
            log::trace!("[client] ignoring stale loss for epoch {}", epoch);
            return;
        }

        self.teardown_link();
        if !self.state.advance(ConnectionState::Disconnected) {
            return;
        }
        log::warn!("[client] connection to {} lost: {}", self.addr, reason);
        self.correlator.fail_all(RequestEnd::ConnectionLost);
        self.notify(|| self.listener.on_disconnected(&reason));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.state.get().is_shutting_down() {
            return;
        }
        let Some(delay) = self.config.reconnect_delay() else {
            log::info!("[client] reconnect disabled, staying disconnected");
            return;
        };
        let weak = Arc::downgrade(self);
        let timer = self.fiber.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.attempt_connect();
                }
            }),
        );
        log::debug!("[client] retrying in {:?}", delay);
        *self.retry.lock() = Some(timer);
    }

    fn teardown_link(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        link.stopped.store(true, Ordering::Release);
        if let Some(heartbeat) = link.heartbeat {
            heartbeat.cancel();
        }
        link.outbound.close();
        let _ = link.stream.shutdown(Shutdown::Both);
        self.wire_topics.lock().clear();
        log::debug!("[client] link epoch {} torn down", link.epoch);
    }

    /// Queue a check of `topic`'s wire subscription against the local table.
    fn sync_wire(self: &Arc<Self>, topic: &str) {
        let inner = Arc::clone(self);
        let topic = topic.to_string();
        self.fiber
            .execute(Box::new(move || inner.reconcile_topic(&topic)));
    }

    /// Runs on the fiber, so it is ordered with replay and teardown.
    fn reconcile_topic(&self, topic: &str) {
        let Some(outbound) = self.link.lock().as_ref().map(|l| l.outbound.clone()) else {
            return;
        };
        let wanted = self.subscriptions.contains(topic);
        let mut wire = self.wire_topics.lock();
        let result = match (wanted, wire.contains(topic)) {
            (true, false) => outbound
                .enqueue_with(|buf| frame::encode_subscribe(topic, buf))
                .map(|()| {
                    wire.insert(topic.to_string());
                }),
            (false, true) => outbound
                .enqueue_with(|buf| frame::encode_unsubscribe(topic, buf))
                .map(|()| {
                    wire.remove(topic);
                }),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::debug!("[client] cannot update subscription '{}': {}", topic, e);
        }
    }

    /// Runs on the fiber; ends it.
    fn shutdown(self: &Arc<Self>, graceful: bool) {
        let link = self
            .link
            .lock()
            .as_ref()
            .map(|l| (l.outbound.clone(), l.logout_ack.clone()));

        let reason = match link {
            None => CloseReason::Closed,
            Some((outbound, ack)) if graceful => {
                let sent = outbound
                    .enqueue_with(|buf| {
                        frame::encode_disconnect(buf);
                        Ok(())
                    })
                    .and_then(|()| outbound.flush_pending().map_err(Error::from));
                match sent {
                    Ok(_) => match ack.recv_timeout(self.config.logout_timeout()) {
                        Ok(true) => CloseReason::Graceful,
                        _ => CloseReason::LogoutNotConfirmed,
                    },
                    Err(e) => {
                        log::debug!("[client] logout not sent: {}", e);
                        CloseReason::LogoutNotConfirmed
                    }
                }
            }
            Some(_) => CloseReason::Closed,
        };

        self.teardown_link();
        self.correlator.fail_all(RequestEnd::ConnectionLost);
        self.state.set(ConnectionState::Closed);
        log::info!("[client] closed: {}", reason);
        self.notify(|| self.listener.on_closed(&reason));

        let waiters = {
            let mut slot = self.closing.lock();
            slot.reason = Some(reason.clone());
            std::mem::take(&mut slot.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(reason.clone());
        }
        self.fiber.dispose();
    }
}

// ============================================================================
// Read path (reader thread)
// ============================================================================

struct ClientReadHandler<C: MessageCodec> {
    inner: Arc<Inner<C>>,
    logout_ack: Sender<bool>,
    server_logout: bool,
    stopped: Arc<AtomicBool>,
}

impl<C: MessageCodec> ClientReadHandler<C> {
    fn finish(self, epoch: u64, exit: ReadExit) {
        // wakes a graceful close still waiting for the acknowledgement
        let _ = self.logout_ack.try_send(false);
        let reason = match exit {
            ReadExit::Stopped => return,
            _ if self.server_logout => CloseReason::ServerLogout,
            ReadExit::PeerClosed => CloseReason::PeerClosed,
            ReadExit::Failed(e) => CloseReason::ReadError(e.to_string()),
        };
        self.inner.connection_lost(epoch, reason);
    }
}

impl<C: MessageCodec> FrameHandler<C::Message> for ClientReadHandler<C> {
    fn on_heartbeat(&mut self) {
        log::trace!("[client] heartbeat");
    }

    fn on_logout(&mut self) {
        if self.inner.state.get() == ConnectionState::Closing {
            let _ = self.logout_ack.try_send(true);
        } else {
            log::info!("[client] server logged us out");
            self.server_logout = true;
        }
    }

    fn on_subscribe(&mut self, topic: &str) {
        log::debug!("[client] ignoring subscribe '{}' from server", topic);
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        log::debug!("[client] ignoring unsubscribe '{}' from server", topic);
    }

    fn on_message(&mut self, topic: &str, message: C::Message) {
        for subscriber in self.inner.subscriptions.subscribers(topic) {
            if !subscriber.is_active() {
                continue;
            }
            if let Err(e) = error::guarded(|| subscriber.call(&message)) {
                log::warn!("[client] subscriber on '{}' failed: {}", topic, e);
                self.inner.report(&e);
            }
        }
    }

    fn on_request(&mut self, request_id: i32, topic: &str, _message: C::Message) {
        log::debug!(
            "[client] ignoring request {} on '{}': clients do not serve requests",
            request_id,
            topic
        );
    }

    fn on_reply(&mut self, request_id: i32, _topic: &str, message: C::Message) {
        self.inner.correlator.complete(request_id, message);
    }

    fn on_raw_frame(&mut self, topic: &str, frame: &[u8]) {
        let inner = &self.inner;
        inner.notify(|| inner.listener.on_raw_frame(topic, frame));
    }

    fn on_decode_error(&mut self, error: CodecError) {
        log::debug!("[client] {}", error);
        self.inner.report(&Error::Codec(error));
    }

    fn on_protocol_error(&mut self, error: ProtocolError) {
        log::debug!("[client] protocol error: {}", error);
        self.inner.report(&Error::Protocol(error));
    }
}

impl<C: MessageCodec> ReadLoopHandler<C::Message> for ClientReadHandler<C> {
    fn on_read_timeout(&mut self) {
        let inner = &self.inner;
        inner.notify(|| inner.listener.on_read_timeout());
    }

    fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8Codec;
    use std::net::TcpListener;
    use std::time::Duration;

    fn unreachable_addr() -> SocketAddr {
        // bound then dropped: connects are refused
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_publish_while_disconnected() {
        let config = ClientConfig::default().with_reconnect_delay(None);
        let client = Client::connect(unreachable_addr(), config, Utf8Codec, ()).unwrap();
        assert!(matches!(
            client.publish("prices", &"1".to_string()),
            Err(Error::NotConnected)
        ));
        let long = "x".repeat(256);
        assert!(matches!(
            client.publish(&long, &"1".to_string()),
            Err(Error::TopicTooLong(256))
        ));
    }

    #[test]
    fn test_subscribe_while_disconnected_is_local() {
        let config = ClientConfig::default().with_reconnect_delay(None);
        let client = Client::connect(unreachable_addr(), config, Utf8Codec, ()).unwrap();
        let a = client.subscribe("a", |_| {}).unwrap();
        let _b = client.subscribe("b", |_| {}).unwrap();
        assert_eq!(client.subscribed_topics(), vec!["a".to_string(), "b".to_string()]);
        a.unsubscribe();
        assert_eq!(client.subscribed_topics(), vec!["b".to_string()]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let config = ClientConfig::default().with_reconnect_delay(None);
        let client = Client::connect(unreachable_addr(), config, Utf8Codec, ()).unwrap();
        let first = client.close(true).recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(first, CloseReason::Closed);
        assert_eq!(client.state(), ConnectionState::Closed);

        let again = client.close(false).recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(again, CloseReason::Closed);
        assert!(matches!(client.subscribe("t", |_| {}), Err(Error::Closed)));
        assert!(matches!(
            client.publish("t", &"x".to_string()),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_no_reconnect_stays_disconnected() {
        struct Failures(Sender<CloseReason>);
        impl ClientListener for Failures {
            fn on_disconnected(&self, reason: &CloseReason) {
                let _ = self.0.send(reason.clone());
            }
        }

        let (tx, rx) = channel::unbounded();
        let config = ClientConfig::default().with_reconnect_delay(None);
        let client = Client::connect(unreachable_addr(), config, Utf8Codec, Failures(tx)).unwrap();

        let reason = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(reason, CloseReason::ConnectFailed(_)));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
