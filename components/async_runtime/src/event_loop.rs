//! The single-threaded event loop and the collaborator surface around it.
//!
//! The loop multiplexes timers and a prioritized task queue on one thread.
//! Each scheduler pass (a *tick*) sweeps the cross-thread inbox into the
//! local queues, fires due timers, then drains the queues strictly
//! High -> Medium -> Low; FIFO within a class. Tasks posted during a pass
//! run in the next one.
//!
//! Promises and the coroutine bridge only ever see the traits defined
//! here: [`Executor`] for in-loop posting, [`RemoteExecutor`] for
//! cross-thread dispatch, [`TimerProvider`] and [`IoProvider`] for event
//! sources. The fd-readiness backend behind [`IoProvider`] lives outside
//! this crate; the trait and the [`IoEvent`] observability contract are
//! the whole interface.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{EventLoop, Executor, Priority, Task};
//!
//! let ev = EventLoop::new();
//! ev.post(Task::new(|| println!("on the loop")), Priority::High);
//! ev.run_until_idle().unwrap();
//! ```

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::LoopError;
use tracing::{debug, trace};

use crate::task_queue::{Priority, PriorityTaskQueue, RemoteTask, RepeatingTask, SharedInbox, Task};

/// A raw file descriptor, as handed to an [`IoProvider`].
pub type Fd = i32;

/// The readiness condition an I/O registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    /// Fire when the descriptor becomes readable.
    Read,
    /// Fire when the descriptor becomes writable.
    Write,
}

/// In-loop execution: enqueue a callback to run on the loop's thread.
///
/// Implementations are shared as `Rc<dyn Executor>` (see [`ExecutorRef`])
/// and are not required to be thread-safe; use [`RemoteExecutor`] from
/// foreign threads.
pub trait Executor {
    /// Enqueues `task` at `prio` for execution in a later scheduler pass.
    fn post(&self, task: Task, prio: Priority);
}

/// A shared handle to an [`Executor`].
pub type ExecutorRef = Rc<dyn Executor>;

/// Cross-thread-safe execution entry point.
///
/// Invoked on the loop's own thread this behaves like [`Executor::post`]
/// (modulo landing at the top of the next tick's sweep).
pub trait RemoteExecutor {
    /// Enqueues `task` at `prio` from any thread.
    fn dispatch(&self, task: RemoteTask, prio: Priority);
}

/// Observability handle for an armed timer.
pub trait TimerEvent {
    /// Cancels the timer; a cancelled timer never fires again.
    fn cancel(&self);
    /// True once the timer has fired at least once.
    fn fired(&self) -> bool;
    /// True once [`cancel`](Self::cancel) has been called.
    fn cancelled(&self) -> bool;
}

/// Observability handle for an I/O registration.
pub trait IoEvent {
    /// Cancels the registration.
    fn cancel(&self);
    /// True once readiness fired.
    fn fired(&self) -> bool;
    /// True once [`cancel`](Self::cancel) has been called.
    fn cancelled(&self) -> bool;
}

/// Timer scheduling surface.
pub trait TimerProvider {
    /// Arms a one-shot timer firing `task` after `delay`.
    fn run_after(&self, delay: Duration, task: Task) -> Box<dyn TimerEvent>;
    /// Arms a periodic timer firing `task` every `interval`, the first
    /// time one full `interval` from now.
    fn run_every(&self, interval: Duration, task: RepeatingTask) -> Box<dyn TimerEvent>;
}

/// Readiness event surface. Fires `task` once when the descriptor becomes
/// ready for `interest`.
pub trait IoProvider {
    /// Registers interest in `fd`.
    fn add_io(&self, fd: Fd, interest: IoInterest, task: Task) -> Box<dyn IoEvent>;
}

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Constructed, or between runs.
    Idle,
    /// Inside one of the run methods.
    Running,
    /// Stopped; the loop cannot run again.
    Stopped,
}

enum TimerCallback {
    Once(Option<Task>),
    Every(Option<RepeatingTask>),
}

struct TimerShared {
    callback: RefCell<TimerCallback>,
    period: Option<Duration>,
    fired: Cell<bool>,
    cancelled: Cell<bool>,
}

struct TimerHandle {
    shared: Rc<TimerShared>,
}

impl TimerEvent for TimerHandle {
    fn cancel(&self) {
        if !self.shared.cancelled.replace(true) {
            trace!("timer cancelled");
        }
    }

    fn fired(&self) -> bool {
        self.shared.fired.get()
    }

    fn cancelled(&self) -> bool {
        self.shared.cancelled.get()
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    timer: Rc<TimerShared>,
}

// BinaryHeap is a max-heap; order entries so the nearest deadline (ties
// broken by arm order) surfaces first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

pub(crate) struct LoopInner {
    queue: RefCell<PriorityTaskQueue>,
    inbox: Arc<SharedInbox>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    timer_seq: Cell<u64>,
    status: Cell<LoopStatus>,
}

impl Executor for LoopInner {
    fn post(&self, task: Task, prio: Priority) {
        self.queue.borrow_mut().push(task, prio);
    }
}

impl LoopInner {
    fn new() -> Self {
        Self {
            queue: RefCell::new(PriorityTaskQueue::new()),
            inbox: Arc::new(SharedInbox::new()),
            timers: RefCell::new(BinaryHeap::new()),
            timer_seq: Cell::new(0),
            status: Cell::new(LoopStatus::Idle),
        }
    }

    fn add_timer(&self, delay: Duration, callback: TimerCallback, period: Option<Duration>) -> Box<dyn TimerEvent> {
        let shared = Rc::new(TimerShared {
            callback: RefCell::new(callback),
            period,
            fired: Cell::new(false),
            cancelled: Cell::new(false),
        });
        let seq = self.timer_seq.get();
        self.timer_seq.set(seq + 1);
        self.timers.borrow_mut().push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            timer: shared.clone(),
        });
        trace!(delay_ms = delay.as_millis() as u64, periodic = period.is_some(), "timer armed");
        Box::new(TimerHandle { shared })
    }

    /// One scheduler pass. Returns the number of tasks executed.
    fn tick(&self) -> usize {
        {
            let mut queue = self.queue.borrow_mut();
            let moved = self.inbox.drain_into(&mut queue);
            if moved > 0 {
                trace!(moved, "swept remote inbox");
            }
        }

        self.fire_due_timers();

        let mut ran = 0;
        for prio in Priority::DRAIN_ORDER {
            // Snapshot the class: tasks posted by this batch run next pass.
            let batch = self.queue.borrow_mut().take_class(prio);
            ran += batch.len();
            for task in batch {
                task.run();
            }
        }
        if ran > 0 {
            trace!(ran, "drained task queues");
        }
        ran
    }

    fn fire_due_timers(&self) {
        loop {
            let now = Instant::now();
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.peek() {
                    Some(entry) if entry.timer.cancelled.get() || entry.deadline <= now => {
                        timers.pop()
                    }
                    _ => None,
                }
            };
            let Some(entry) = due else { break };
            if entry.timer.cancelled.get() {
                continue;
            }
            self.fire_timer(entry, now);
        }
    }

    fn fire_timer(&self, entry: TimerEntry, now: Instant) {
        enum Armed {
            Nothing,
            Once(Task),
            Every(RepeatingTask),
        }

        let timer = entry.timer;
        let armed = {
            let mut callback = timer.callback.borrow_mut();
            match &mut *callback {
                TimerCallback::Once(slot) => slot.take().map(Armed::Once).unwrap_or(Armed::Nothing),
                TimerCallback::Every(slot) => {
                    slot.take().map(Armed::Every).unwrap_or(Armed::Nothing)
                }
            }
        };

        // The callback runs with no borrows held; it may arm or cancel
        // timers, including this one.
        match armed {
            Armed::Nothing => return,
            Armed::Once(task) => {
                trace!("timer fired");
                task.run();
            }
            Armed::Every(mut task) => {
                trace!("periodic timer fired");
                task.run();
                if let TimerCallback::Every(slot) = &mut *timer.callback.borrow_mut() {
                    *slot = Some(task);
                }
            }
        }
        timer.fired.set(true);

        if let Some(period) = timer.period {
            if !timer.cancelled.get() {
                let seq = self.timer_seq.get();
                self.timer_seq.set(seq + 1);
                self.timers.borrow_mut().push(TimerEntry {
                    deadline: now + period,
                    seq,
                    timer,
                });
            }
        }
    }

    fn has_live_timer(&self) -> bool {
        self.timers
            .borrow()
            .iter()
            .any(|entry| !entry.timer.cancelled.get())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .borrow()
            .iter()
            .filter(|entry| !entry.timer.cancelled.get())
            .map(|entry| entry.deadline)
            .min()
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.borrow().is_empty() || self.inbox.has_tasks() || self.has_live_timer()
    }

    fn cancel_all_timers(&self) {
        let mut timers = self.timers.borrow_mut();
        let remaining = timers.len();
        for entry in timers.iter() {
            entry.timer.cancelled.set(true);
        }
        timers.clear();
        if remaining > 0 {
            trace!(remaining, "cancelled outstanding timers");
        }
    }
}

thread_local! {
    static CURRENT_LOOP: RefCell<Weak<LoopInner>> = RefCell::new(Weak::new());
}

/// The single-threaded cooperative event loop.
///
/// Callbacks, promise continuations and resumed coroutines all run on the
/// loop's thread, interleaved only at suspension points. The only
/// cross-thread surfaces are [`LoopHandle`] (obtained via
/// [`handle`](Self::handle)) and [`RemoteExecutor::dispatch`].
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, Promise};
///
/// let ev = EventLoop::new();
/// let promise: Promise<u32, String> = Promise::with_executor(ev.executor());
/// let resolver = promise.resolver();
///
/// promise.then(|r| assert_eq!(r.value_or(0), 9));
/// resolver.resolve(9);
/// ev.run_until_idle().unwrap();
/// ```
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Creates an idle loop.
    pub fn new() -> Self {
        EventLoop {
            inner: Rc::new(LoopInner::new()),
        }
    }

    /// A shareable in-loop executor for this loop.
    pub fn executor(&self) -> ExecutorRef {
        self.inner.clone()
    }

    /// A `Send + Sync` handle for cross-thread dispatch and remote stop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inbox: self.inner.inbox.clone(),
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> LoopStatus {
        self.inner.status.get()
    }

    /// The executor of the loop currently running on this thread, if any.
    ///
    /// This is the per-thread slot the coroutine bridge captures at each
    /// suspension point to choose its resumption context.
    pub fn current_executor() -> Option<ExecutorRef> {
        CURRENT_LOOP.with(|slot| {
            slot.borrow().upgrade().map(|inner| {
                let exec: ExecutorRef = inner;
                exec
            })
        })
    }

    /// Runs exactly one scheduler pass and returns the number of tasks it
    /// executed.
    pub fn tick(&self) -> usize {
        self.register_current();
        self.inner.tick()
    }

    /// Runs until no task is queued and no timer is armed.
    ///
    /// Note that an armed periodic timer counts as pending work; drive
    /// loops hosting periodic timers with [`run_forever`](Self::run_forever)
    /// and [`stop`](Self::stop) (or [`tick`](Self::tick)) instead.
    pub fn run_until_idle(&self) -> Result<(), LoopError> {
        self.enter_run()?;
        debug!("event loop running until idle");
        let stopped = loop {
            let ran = self.inner.tick();
            if self.inner.inbox.is_stopped() {
                break true;
            }
            if !self.inner.has_pending_work() {
                break false;
            }
            if ran == 0 {
                self.inner.inbox.park_until(self.inner.next_deadline());
            }
        };
        self.leave_run(stopped);
        Ok(())
    }

    /// Runs until [`stop`](Self::stop) is requested, parking between
    /// passes while there is nothing to do.
    pub fn run_forever(&self) -> Result<(), LoopError> {
        self.enter_run()?;
        debug!("event loop running");
        loop {
            if self.inner.inbox.is_stopped() {
                break;
            }
            self.inner.tick();
            if self.inner.inbox.is_stopped() {
                break;
            }
            if self.inner.queue.borrow().is_empty() && !self.inner.inbox.has_tasks() {
                self.inner.inbox.park_until(self.inner.next_deadline());
            }
        }
        self.leave_run(true);
        Ok(())
    }

    /// Requests the loop to stop. Safe to call from loop tasks; for other
    /// threads use [`LoopHandle::stop`].
    pub fn stop(&self) {
        self.inner.inbox.request_stop();
    }

    fn enter_run(&self) -> Result<(), LoopError> {
        match self.inner.status.get() {
            LoopStatus::Running => Err(LoopError::AlreadyRunning),
            LoopStatus::Stopped => Err(LoopError::Terminated),
            LoopStatus::Idle => {
                self.inner.status.set(LoopStatus::Running);
                self.register_current();
                Ok(())
            }
        }
    }

    fn leave_run(&self, stopped: bool) {
        if stopped {
            self.inner.cancel_all_timers();
            self.inner.status.set(LoopStatus::Stopped);
            debug!("event loop stopped");
        } else {
            self.inner.status.set(LoopStatus::Idle);
            debug!("event loop idle");
        }
    }

    fn register_current(&self) {
        CURRENT_LOOP.with(|slot| {
            let mut current = slot.borrow_mut();
            if !current.ptr_eq(&Rc::downgrade(&self.inner)) {
                *current = Rc::downgrade(&self.inner);
            }
        });
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|slot| {
            let mut current = slot.borrow_mut();
            if current.ptr_eq(&Rc::downgrade(&self.inner)) {
                *current = Weak::new();
            }
        });
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Executor for EventLoop {
    fn post(&self, task: Task, prio: Priority) {
        self.inner.post(task, prio);
    }
}

impl RemoteExecutor for EventLoop {
    fn dispatch(&self, task: RemoteTask, prio: Priority) {
        self.inner.inbox.push(task, prio);
    }
}

impl TimerProvider for EventLoop {
    fn run_after(&self, delay: Duration, task: Task) -> Box<dyn TimerEvent> {
        self.inner
            .add_timer(delay, TimerCallback::Once(Some(task)), None)
    }

    fn run_every(&self, interval: Duration, task: RepeatingTask) -> Box<dyn TimerEvent> {
        self.inner
            .add_timer(interval, TimerCallback::Every(Some(task)), Some(interval))
    }
}

/// A `Send + Sync` handle over a loop: cross-thread dispatch and stop.
#[derive(Clone)]
pub struct LoopHandle {
    inbox: Arc<SharedInbox>,
}

impl LoopHandle {
    /// Requests the owning loop to stop.
    pub fn stop(&self) {
        self.inbox.request_stop();
    }
}

impl RemoteExecutor for LoopHandle {
    fn dispatch(&self, task: RemoteTask, prio: Priority) {
        self.inbox.push(task, prio);
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopHandle {{ ... }}")
    }
}
