//! Coordinator-thread message loop.
//!
//! A single-threaded cooperative task queue, one per thread, installed with
//! [`MessageLoop::new`]. Other threads reach it through a cloneable
//! [`LoopHandle`] that posts immediate or delayed tasks.
//!
//! # Design
//!
//! - The loop owns both ends of its channel, so posting never fails while the
//!   loop is alive and fails with [`SpoolError::LoopGone`] once it is dropped.
//! - Runs nest. A task may call [`run_nested`] (or any `run*` method) and the
//!   inner run keeps draining the same queue. [`quit_current`] always targets
//!   the innermost run level.
//! - Delayed tasks are kept in a min-heap keyed by deadline, then post order.
//!   A delay too large to represent as an `Instant` is clamped to
//!   [`FAR_FUTURE`] from now, so it never comes due in practice.
//! - `MessageLoop` is `!Send`: it never leaves the thread that created it.

use crate::error::{Result, SpoolError};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Unit of work posted to a loop or a worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Upper bound on how far ahead a deadline is placed (about a century).
pub const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + delay`, clamped so it cannot overflow.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

enum LoopMessage {
    Run(Task),
    RunAt { run_at: Instant, task: Task },
}

struct DelayedTask {
    run_at: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.sequence == other.sequence
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed: BinaryHeap is a max-heap and we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<LoopCore>>> = const { RefCell::new(None) };
}

enum Step {
    Ran,
    Idle,
}

struct LoopCore {
    sender: Sender<LoopMessage>,
    receiver: Receiver<LoopMessage>,
    delayed: RefCell<BinaryHeap<DelayedTask>>,
    next_sequence: Cell<u64>,
    quit_flags: RefCell<Vec<bool>>,
    thread: ThreadId,
}

impl LoopCore {
    fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.sender.clone(),
            thread: self.thread,
        }
    }

    fn schedule(&self, run_at: Instant, task: Task) {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        self.delayed.borrow_mut().push(DelayedTask {
            run_at,
            sequence,
            task,
        });
    }

    fn pop_due(&self, now: Instant) -> Option<Task> {
        let mut delayed = self.delayed.borrow_mut();
        match delayed.peek() {
            Some(next) if next.run_at <= now => delayed.pop().map(|d| d.task),
            _ => None,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.borrow().peek().map(|d| d.run_at)
    }

    /// Run at most one task. Blocks until a task runs or `wait_until` passes
    /// (`None` blocks until a task runs).
    ///
    /// No `RefCell` borrow is held while a task executes.
    fn step(&self, wait_until: Option<Instant>) -> Step {
        loop {
            let now = Instant::now();
            if let Some(task) = self.pop_due(now) {
                task();
                return Step::Ran;
            }

            let wake_at = match (self.next_deadline(), wait_until) {
                (Some(deadline), Some(limit)) => Some(deadline.min(limit)),
                (deadline, limit) => deadline.or(limit),
            };
            let message = match wake_at {
                None => self
                    .receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
                Some(at) => self
                    .receiver
                    .recv_timeout(at.saturating_duration_since(now)),
            };

            match message {
                Ok(LoopMessage::Run(task)) => {
                    task();
                    return Step::Ran;
                }
                Ok(LoopMessage::RunAt { run_at, task }) => self.schedule(run_at, task),
                Err(RecvTimeoutError::Timeout) => {
                    if wait_until.is_some_and(|limit| Instant::now() >= limit) {
                        return Step::Idle;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Step::Idle,
            }
        }
    }

    fn quit_requested(&self) -> bool {
        self.quit_flags.borrow().last().copied().unwrap_or(false)
    }

    fn push_level(&self) -> usize {
        let mut flags = self.quit_flags.borrow_mut();
        flags.push(false);
        flags.len()
    }

    fn pop_level(&self) {
        self.quit_flags.borrow_mut().pop();
    }

    fn run(&self) {
        let depth = self.push_level();
        trace!("Message loop run level {} entered", depth);
        while !self.quit_requested() {
            self.step(None);
        }
        self.pop_level();
        trace!("Message loop run level {} exited", depth);
    }

    fn run_until_idle(&self) {
        self.push_level();
        while !self.quit_requested() {
            if let Step::Idle = self.step(Some(Instant::now())) {
                break;
            }
        }
        self.pop_level();
    }

    /// Run a level until `condition` holds, the level is quit, or `deadline`
    /// passes (`None` never passes).
    fn run_until(&self, condition: &mut dyn FnMut() -> bool, deadline: Option<Instant>) -> bool {
        self.push_level();
        let satisfied = loop {
            if condition() {
                break true;
            }
            if self.quit_requested() || deadline.is_some_and(|at| Instant::now() >= at) {
                break false;
            }
            self.step(deadline);
        };
        self.pop_level();
        satisfied
    }

    fn quit(&self) -> bool {
        match self.quit_flags.borrow_mut().last_mut() {
            Some(flag) => {
                *flag = true;
                true
            }
            None => {
                debug!("quit requested while the message loop is not running");
                false
            }
        }
    }
}

/// The current thread's message loop.
///
/// Dropping it uninstalls the loop; tasks still queued are dropped unrun.
pub struct MessageLoop {
    core: Rc<LoopCore>,
}

impl MessageLoop {
    /// Install a new loop on the calling thread.
    pub fn new() -> Result<Self> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_some() {
                return Err(SpoolError::LoopAlreadyInstalled);
            }
            let (sender, receiver) = mpsc::channel();
            let core = Rc::new(LoopCore {
                sender,
                receiver,
                delayed: RefCell::new(BinaryHeap::new()),
                next_sequence: Cell::new(0),
                quit_flags: RefCell::new(Vec::new()),
                thread: thread::current().id(),
            });
            *current = Some(Rc::clone(&core));
            Ok(Self { core })
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.core.handle()
    }

    /// Run until [`quit`](Self::quit) (or [`quit_current`]) is called from a task.
    pub fn run(&self) {
        self.core.run();
    }

    /// Run every task that is ready now, then return.
    pub fn run_until_idle(&self) {
        self.core.run_until_idle();
    }

    /// Run tasks until `condition` holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub fn run_until(&self, mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), timeout);
        self.core.run_until(&mut condition, Some(deadline))
    }

    /// Quit the innermost active run level.
    pub fn quit(&self) {
        self.core.quit();
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoop")
            .field("thread", &self.core.thread)
            .field("run_depth", &self.core.quit_flags.borrow().len())
            .finish()
    }
}

fn with_current<R>(f: impl FnOnce(&LoopCore) -> R) -> Option<R> {
    // Clone the Rc out so no thread-local borrow is held while tasks run.
    let core = CURRENT.try_with(|current| current.borrow().clone()).ok().flatten()?;
    Some(f(&core))
}

/// Handle to the calling thread's loop, if one is installed.
pub fn current() -> Option<LoopHandle> {
    with_current(|core| core.handle())
}

/// Run the calling thread's loop as a nested run level until quit.
///
/// Returns `false` when the thread has no loop.
pub fn run_nested() -> bool {
    with_current(|core| core.run()).is_some()
}

/// Run the calling thread's loop as a nested run level until `condition`
/// holds or the level is quit. The condition is checked before each task.
///
/// Returns whether the condition was met; `false` when the thread has no loop.
pub fn run_nested_until(mut condition: impl FnMut() -> bool) -> bool {
    with_current(|core| core.run_until(&mut condition, None)).unwrap_or(false)
}

/// Quit the innermost run level of the calling thread's loop.
pub fn quit_current() -> bool {
    with_current(|core| core.quit()).unwrap_or(false)
}

/// Cloneable, thread-safe handle for posting tasks to a [`MessageLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    sender: Sender<LoopMessage>,
    thread: ThreadId,
}

impl LoopHandle {
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(LoopMessage::Run(Box::new(task)))
            .map_err(|_| SpoolError::LoopGone)
    }

    pub fn post_delayed_task<F>(&self, task: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let run_at = deadline_after(Instant::now(), delay);
        self.sender
            .send(LoopMessage::RunAt {
                run_at,
                task: Box::new(task),
            })
            .map_err(|_| SpoolError::LoopGone)
    }

    /// Whether the calling thread is the one this loop runs on.
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.thread)
            .field("sender", &"<std::sync::mpsc::Sender>")
            .finish()
    }
}
