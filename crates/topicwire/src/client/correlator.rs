// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply correlation.
//!
//! Each request gets the next id and a pending entry. Whoever claims the
//! entry's completion flag first (reply, timeout, connection loss, or
//! cancel) wins; the others find it claimed and do nothing, so exactly one
//! callback runs per request.
//!
//! Reply and timeout callbacks run on the client fiber.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{self, Error};
use crate::fiber::{Fiber, TimerHandle};

pub type ReplyFn<M> = Box<dyn FnOnce(M) + Send + 'static>;
pub type TimeoutFn = Box<dyn FnOnce(RequestTimeout) + Send + 'static>;
pub(crate) type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// Why a request ended without a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestEnd {
    /// The timeout elapsed
    Elapsed,

    /// The connection dropped or the client closed
    ConnectionLost,
}

/// Completion flag and timer shared by a pending entry and its handles.
#[derive(Default)]
struct Ticket {
    completed: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
}

impl Ticket {
    /// True for the single caller that completes the request.
    fn claim(&self) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
        true
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

struct PendingEntry<M> {
    ticket: Arc<Ticket>,
    on_reply: Mutex<Option<ReplyFn<M>>>,
    on_timeout: Mutex<Option<TimeoutFn>>,
}

type PendingMap<M> = DashMap<i32, Arc<PendingEntry<M>>>;

/// Type-erased removal, so handles need not carry the message type.
trait Forget: Send + Sync {
    fn forget(&self, id: i32, ticket: &Arc<Ticket>);
}

impl<M: Send + 'static> Forget for PendingMap<M> {
    fn forget(&self, id: i32, ticket: &Arc<Ticket>) {
        self.remove_if(&id, |_, entry| Arc::ptr_eq(&entry.ticket, ticket));
    }
}

/// Handle to an in-flight request.
#[derive(Clone)]
pub struct PendingRequest {
    id: i32,
    ticket: Arc<Ticket>,
    pending: Weak<dyn Forget>,
}

impl PendingRequest {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// A reply, timeout, or cancel already ended this request.
    pub fn is_completed(&self) -> bool {
        self.ticket.is_completed()
    }

    /// Drop the pending entry without running any callback. A reply arriving
    /// later is ignored. Idempotent.
    pub fn cancel(&self) {
        self.ticket.claim();
        if let Some(pending) = self.pending.upgrade() {
            pending.forget(self.id, &self.ticket);
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Passed to the timeout callback.
#[derive(Debug)]
pub struct RequestTimeout {
    request: PendingRequest,
    cause: RequestEnd,
}

impl RequestTimeout {
    pub fn request_id(&self) -> i32 {
        self.request.id
    }

    pub fn cause(&self) -> RequestEnd {
        self.cause
    }

    /// Make sure the pending entry is gone. The correlator already removed
    /// it, so this never fails.
    pub fn cancel_request(&self) {
        self.request.cancel();
    }
}

/// Client-side map from request id to pending callbacks.
pub(crate) struct Correlator<M> {
    fiber: Arc<dyn Fiber>,
    next_id: AtomicI32,
    pending: Arc<PendingMap<M>>,
    report: ErrorSink,
}

impl<M: Send + 'static> Correlator<M> {
    pub(crate) fn new(fiber: Arc<dyn Fiber>, report: ErrorSink) -> Self {
        Self {
            fiber,
            next_id: AtomicI32::new(1),
            pending: Arc::new(DashMap::new()),
            report,
        }
    }

    /// Record a pending request and arm its timeout. A zero timeout leaves
    /// the request waiting until a reply, cancel, or connection loss.
    pub(crate) fn register(
        &self,
        on_reply: ReplyFn<M>,
        on_timeout: TimeoutFn,
        timeout: Duration,
    ) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ticket = Arc::new(Ticket::default());
        let entry = Arc::new(PendingEntry {
            ticket: Arc::clone(&ticket),
            on_reply: Mutex::new(Some(on_reply)),
            on_timeout: Mutex::new(Some(on_timeout)),
        });
        self.pending.insert(id, Arc::clone(&entry));

        if !timeout.is_zero() {
            let pending = Arc::clone(&self.pending);
            let report = Arc::clone(&self.report);
            let handle_entry = Arc::clone(&entry);
            let timer = self.fiber.schedule(
                timeout,
                Box::new(move || {
                    if !handle_entry.ticket.claim() {
                        return;
                    }
                    pending.forget(id, &handle_entry.ticket);
                    log::debug!("[correlator] request {} timed out", id);
                    let request = handle(id, &handle_entry.ticket, &pending);
                    fire_timeout(&handle_entry, request, RequestEnd::Elapsed, &report);
                }),
            );
            // the timer may already have fired on a very short timeout
            if ticket.is_completed() {
                timer.cancel();
            } else {
                *ticket.timer.lock() = Some(timer);
            }
        }

        handle(id, &ticket, &self.pending)
    }

    /// Deliver a reply. Returns `false` if no live request has this id.
    pub(crate) fn complete(&self, id: i32, message: M) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            log::debug!("[correlator] dropping reply for unknown request {}", id);
            return false;
        };
        if !entry.ticket.claim() {
            return false;
        }
        let Some(on_reply) = entry.on_reply.lock().take() else {
            return false;
        };
        let report = Arc::clone(&self.report);
        self.fiber.execute(Box::new(move || {
            if let Err(e) = error::guarded(|| on_reply(message)) {
                log::warn!("[correlator] reply callback for {} failed: {}", id, e);
                report(&e);
            }
        }));
        true
    }

    /// End every live request through its timeout callback with `cause`.
    pub(crate) fn fail_all(&self, cause: RequestEnd) -> usize {
        let ids: Vec<i32> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            let Some((_, entry)) = self.pending.remove(&id) else {
                continue;
            };
            if !entry.ticket.claim() {
                continue;
            }
            let request = handle(id, &entry.ticket, &self.pending);
            let report = Arc::clone(&self.report);
            self.fiber.execute(Box::new(move || {
                fire_timeout(&entry, request, cause, &report);
            }));
            failed += 1;
        }
        if failed > 0 {
            log::debug!("[correlator] failed {} pending request(s): {:?}", failed, cause);
        }
        failed
    }

    /// Forget a request whose frame could not be sent.
    pub(crate) fn discard(&self, request: &PendingRequest) {
        request.cancel();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn handle<M: Send + 'static>(
    id: i32,
    ticket: &Arc<Ticket>,
    pending: &Arc<PendingMap<M>>,
) -> PendingRequest {
    let map: Arc<dyn Forget> = Arc::clone(pending) as Arc<dyn Forget>;
    PendingRequest {
        id,
        ticket: Arc::clone(ticket),
        pending: Arc::downgrade(&map),
    }
}

fn fire_timeout<M>(
    entry: &PendingEntry<M>,
    request: PendingRequest,
    cause: RequestEnd,
    report: &ErrorSink,
) {
    let Some(on_timeout) = entry.on_timeout.lock().take() else {
        return;
    };
    let id = request.id;
    if let Err(e) = error::guarded(|| on_timeout(RequestTimeout { request, cause })) {
        log::warn!("[correlator] timeout callback for {} failed: {}", id, e);
        report(&e);
    }
}
