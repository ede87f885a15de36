// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server event listener.

use std::sync::Arc;

use crate::codec::MessageCodec;
use crate::error::{self, Error};
use crate::server::session::{Replier, Session, SessionCloseReason};

/// Receives session lifecycle and traffic events.
///
/// All methods default to no-ops. Callbacks must be `Send + Sync` because
/// they are invoked from several threads:
///
/// - `on_session_opened`, `on_subscribe`, `on_unsubscribe`,
///   `on_session_closed` run on the server hub fiber, in order with
///   broadcasts.
/// - `on_message`, `on_request`, `on_raw_frame`, `on_read_timeout`,
///   `on_logout` run on the session's reader thread.
/// - `on_error` runs wherever the failure was observed.
///
/// A panic inside a callback is caught and reported through `on_error`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use topicwire::{Replier, ServerListener, Session, Utf8Codec};
///
/// struct Echo;
///
/// impl ServerListener<Utf8Codec> for Echo {
///     fn on_request(
///         &self,
///         _session: &Arc<Session<Utf8Codec>>,
///         _topic: &str,
///         message: String,
///         replier: Replier<Utf8Codec>,
///     ) {
///         let _ = replier.reply(&format!("{}-reply", message));
///     }
/// }
/// ```
pub trait ServerListener<C: MessageCodec>: Send + Sync + 'static {
    fn on_session_opened(&self, session: &Arc<Session<C>>) {
        let _ = session;
    }

    fn on_session_closed(&self, session: &Arc<Session<C>>, reason: &SessionCloseReason) {
        let _ = (session, reason);
    }

    /// The topic is already in the session's subscription set.
    fn on_subscribe(&self, session: &Arc<Session<C>>, topic: &str) {
        let _ = (session, topic);
    }

    fn on_unsubscribe(&self, session: &Arc<Session<C>>, topic: &str) {
        let _ = (session, topic);
    }

    fn on_message(&self, session: &Arc<Session<C>>, topic: &str, message: C::Message) {
        let _ = (session, topic, message);
    }

    /// `replier` answers this request on the same session, at most once.
    fn on_request(
        &self,
        session: &Arc<Session<C>>,
        topic: &str,
        message: C::Message,
        replier: Replier<C>,
    ) {
        let _ = (session, topic, message, replier);
    }

    /// Undecoded Data frame, when raw frames are enabled.
    fn on_raw_frame(&self, session: &Arc<Session<C>>, topic: &str, frame: &[u8]) {
        let _ = (session, topic, frame);
    }

    /// No inbound traffic within the read timeout. The session stays open.
    fn on_read_timeout(&self, session: &Arc<Session<C>>) {
        let _ = session;
    }

    /// The client asked to disconnect; the acknowledgement is already queued.
    fn on_logout(&self, session: &Arc<Session<C>>) {
        let _ = session;
    }

    fn on_error(&self, session: Option<&Arc<Session<C>>>, error: &Error) {
        let _ = (session, error);
    }
}

/// Listener that ignores every event.
impl<C: MessageCodec> ServerListener<C> for () {}

/// Invoke a listener callback, routing a panic to `on_error`.
pub(crate) fn dispatch<C, F>(
    listener: &dyn ServerListener<C>,
    session: Option<&Arc<Session<C>>>,
    callback: F,
) where
    C: MessageCodec,
    F: FnOnce(),
{
    if let Err(e) = error::guarded(callback) {
        log::warn!("[server] listener callback failed: {}", e);
        if session.is_some_and(|s| s.is_logged_out()) {
            return;
        }
        if error::guarded(|| listener.on_error(session, &e)).is_err() {
            log::warn!("[server] listener on_error panicked");
        }
    }
}
