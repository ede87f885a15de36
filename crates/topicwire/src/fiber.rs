// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial execution contexts.
//!
//! A [`Fiber`] runs submitted tasks one at a time, in submission order, and
//! fires scheduled timers on the same context. Everything that must not
//! interleave (writes to one socket, subscription bookkeeping, request
//! completion) is funnelled through one fiber instead of being locked.
//!
//! [`ThreadFiber`] backs the contract with a dedicated OS thread:
//!
//! ```text
//!   execute()/schedule() --> crossbeam channel --> [fiber thread]
//!                                                    |  tasks (FIFO)
//!                                                    |  timers (BinaryHeap by deadline)
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{self, Error, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Serial task executor with timers.
pub trait Fiber: Send + Sync {
    /// Queue a task behind everything already submitted.
    fn execute(&self, task: Task);

    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Run `task` after `initial`, then every `interval`.
    fn schedule_repeating(
        &self,
        initial: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> TimerHandle;

    /// Stop accepting work. Already queued tasks still run.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Cancellation handle for a scheduled task.
///
/// Cancelling is idempotent and safe from any thread.
#[derive(Clone, Debug, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ============================================================================
// Thread-backed fiber
// ============================================================================

enum Command {
    Run(Task),
    Timer(TimerEntry),
    Stop,
}

enum TimerJob {
    Once(Task),
    Repeating {
        interval: Duration,
        task: RepeatingTask,
    },
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    job: TimerJob,
}

// Min-heap on (deadline, seq).
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// [`Fiber`] running on a dedicated named thread.
pub struct ThreadFiber {
    name: String,
    tx: Sender<Command>,
    disposed: AtomicBool,
    timer_seq: AtomicU64,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadFiber {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = channel::unbounded();
        let loop_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&loop_name, rx))
            .map_err(|source| Error::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            tx,
            disposed: AtomicBool::new(false),
            timer_seq: AtomicU64::new(0),
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from this fiber's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn submit_timer(&self, delay: Duration, job: TimerJob) -> TimerHandle {
        let handle = TimerHandle::new();
        if self.is_disposed() {
            handle.cancel();
            return handle;
        }
        // a deadline past the end of `Instant` never fires
        let Some(deadline) = Instant::now().checked_add(delay) else {
            log::trace!("[fiber {}] timer delay {:?} out of range, not armed", self.name, delay);
            return handle;
        };
        let entry = TimerEntry {
            deadline,
            seq: self.timer_seq.fetch_add(1, Ordering::Relaxed),
            handle: handle.clone(),
            job,
        };
        if self.tx.send(Command::Timer(entry)).is_err() {
            handle.cancel();
        }
        handle
    }
}

impl Fiber for ThreadFiber {
    fn execute(&self, task: Task) {
        if self.is_disposed() {
            log::trace!("[fiber {}] dropping task submitted after dispose", self.name);
            return;
        }
        let _ = self.tx.send(Command::Run(task));
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        self.submit_timer(delay, TimerJob::Once(task))
    }

    fn schedule_repeating(
        &self,
        initial: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> TimerHandle {
        self.submit_timer(initial, TimerJob::Repeating { interval, task })
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Command::Stop);
        if self.is_current() {
            // joining ourselves would deadlock; the loop exits after this task
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                log::warn!("[fiber {}] thread terminated abnormally", self.name);
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ThreadFiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadFiber")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn run_loop(name: &str, rx: Receiver<Command>) {
    log::debug!("[fiber {}] started", name);
    let mut timers: BinaryHeap<TimerEntry> = BinaryHeap::new();

    loop {
        fire_due_timers(name, &mut timers);

        let next = match timers.peek() {
            Some(entry) => {
                let wait = entry.deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(wait)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(Command::Run(task)) => run_guarded(name, task),
            Ok(Command::Timer(entry)) => timers.push(entry),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let dropped = timers.iter().filter(|t| !t.handle.is_cancelled()).count();
    log::debug!("[fiber {}] stopped ({} pending timers dropped)", name, dropped);
}

fn fire_due_timers(name: &str, timers: &mut BinaryHeap<TimerEntry>) {
    let now = Instant::now();
    while timers.peek().is_some_and(|t| t.deadline <= now) {
        let Some(entry) = timers.pop() else {
            break;
        };
        if entry.handle.is_cancelled() {
            continue;
        }
        match entry.job {
            TimerJob::Once(task) => run_guarded(name, task),
            TimerJob::Repeating { interval, mut task } => {
                run_guarded(name, || task());
                if entry.handle.is_cancelled() {
                    continue;
                }
                if let Some(deadline) = entry
                    .deadline
                    .checked_add(interval.max(Duration::from_millis(1)))
                {
                    timers.push(TimerEntry {
                        deadline,
                        seq: entry.seq,
                        handle: entry.handle,
                        job: TimerJob::Repeating { interval, task },
                    });
                }
            }
        }
    }
}

fn run_guarded<F: FnOnce()>(name: &str, task: F) {
    if let Err(e) = error::guarded(task) {
        log::warn!("[fiber {}] task failed: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fiber() -> ThreadFiber {
        ThreadFiber::spawn("test-fiber").expect("spawn fiber")
    }

    #[test]
    fn test_execute_in_order() {
        let fiber = fiber();
        let (tx, rx) = channel::unbounded();
        for i in 0..100 {
            let tx = tx.clone();
            fiber.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let got: Vec<i32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_tasks_run_on_fiber_thread() {
        let fiber = Arc::new(fiber());
        let (tx, rx) = channel::bounded(1);
        let f = Arc::clone(&fiber);
        fiber.execute(Box::new(move || tx.send(f.is_current()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(!fiber.is_current());
    }

    #[test]
    fn test_schedule_and_cancel() {
        let fiber = fiber();
        let (tx, rx) = channel::unbounded();

        let tx1 = tx.clone();
        fiber.schedule(Duration::from_millis(20), Box::new(move || tx1.send("fired").unwrap()));
        let tx2 = tx.clone();
        let handle = fiber.schedule(
            Duration::from_millis(10),
            Box::new(move || tx2.send("cancelled").unwrap()),
        );
        handle.cancel();
        handle.cancel();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fired");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_timers_fire_by_deadline() {
        let fiber = fiber();
        let (tx, rx) = channel::unbounded();
        for (delay, label) in [(30, 'c'), (10, 'a'), (20, 'b')] {
            let tx = tx.clone();
            fiber.schedule(
                Duration::from_millis(delay),
                Box::new(move || tx.send(label).unwrap()),
            );
        }
        let got: Vec<char> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_repeating_until_cancelled() {
        let fiber = fiber();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = fiber.schedule_repeating(
            Duration::ZERO,
            Duration::from_millis(5),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 3, "only {} ticks", after_cancel);

        thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[test]
    fn test_panicking_task_does_not_kill_fiber() {
        let fiber = fiber();
        fiber.execute(Box::new(|| panic!("task panic")));
        let (tx, rx) = channel::bounded(1);
        fiber.execute(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_dispose_runs_queued_then_rejects() {
        let fiber = fiber();
        let (tx, rx) = channel::unbounded();
        let tx1 = tx.clone();
        fiber.execute(Box::new(move || tx1.send(1).unwrap()));
        fiber.dispose();
        assert!(fiber.is_disposed());
        assert_eq!(rx.try_recv().unwrap(), 1);

        fiber.execute(Box::new(move || tx.send(2).unwrap()));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let handle = fiber.schedule(Duration::ZERO, Box::new(|| {}));
        assert!(handle.is_cancelled());
        fiber.dispose();
    }

    #[test]
    fn test_out_of_range_delay_never_fires() {
        let fiber = fiber();
        let (tx, rx) = channel::unbounded();
        let tx1 = tx.clone();
        let handle = fiber.schedule(Duration::MAX, Box::new(move || tx1.send("once").unwrap()));
        assert!(!handle.is_cancelled());
        fiber.schedule_repeating(
            Duration::ZERO,
            Duration::MAX,
            Box::new(move || tx.send("repeat").unwrap()),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "repeat");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let (tx, rx) = channel::bounded(1);
        fiber.execute(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_dispose_from_own_task() {
        let fiber = Arc::new(fiber());
        let (tx, rx) = channel::bounded(1);
        let f = Arc::clone(&fiber);
        fiber.execute(Box::new(move || {
            f.dispose();
            tx.send(()).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(fiber.is_disposed());
    }
}
