//! Task units and the prioritized queues behind the event loop.
//!
//! The loop runs three classes of work. [`Task`]s are same-thread boxed
//! callbacks posted through an executor. [`RemoteTask`]s additionally
//! require `Send` and travel through the cross-thread [`SharedInbox`],
//! the only locked structure in the runtime. [`RepeatingTask`]s back
//! periodic timers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Scheduling class for a posted callback.
///
/// Each scheduler pass drains `High` first, then `Medium`, then `Low`;
/// within one class, execution order is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Drained last.
    Low = 0,
    /// Drained after `High`.
    Medium = 1,
    /// Drained first.
    High = 2,
}

impl Priority {
    pub(crate) const COUNT: usize = 3;

    /// Drain order for one scheduler pass.
    pub(crate) const DRAIN_ORDER: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A unit of in-loop work: a boxed one-shot callback.
///
/// Tasks are not `Send`; they may capture loop-local state. Work arriving
/// from other threads uses [`RemoteTask`] instead.
pub struct Task {
    callback: Box<dyn FnOnce()>,
}

impl Task {
    /// Creates a task from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the task, consuming it.
    pub fn run(self) {
        (self.callback)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {{ ... }}")
    }
}

/// A unit of work posted from a foreign thread.
pub struct RemoteTask {
    callback: Box<dyn FnOnce() + Send>,
}

impl RemoteTask {
    /// Creates a remote task from a `Send` closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the task, consuming it.
    pub fn run(self) {
        (self.callback)();
    }

    pub(crate) fn into_local(self) -> Task {
        let callback = self.callback;
        Task::new(move || callback())
    }
}

impl fmt::Debug for RemoteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteTask {{ ... }}")
    }
}

/// A re-runnable callback backing a periodic timer.
pub struct RepeatingTask {
    callback: Box<dyn FnMut()>,
}

impl RepeatingTask {
    /// Creates a repeating task from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes one firing of the task.
    pub fn run(&mut self) {
        (self.callback)();
    }
}

impl fmt::Debug for RepeatingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepeatingTask {{ ... }}")
    }
}

/// Three FIFO queues, one per [`Priority`] class.
#[derive(Debug, Default)]
pub struct PriorityTaskQueue {
    classes: [VecDeque<Task>; Priority::COUNT],
}

impl PriorityTaskQueue {
    /// Creates an empty queue set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task to its priority class.
    pub fn push(&mut self, task: Task, prio: Priority) {
        self.classes[prio.index()].push_back(task);
    }

    /// Removes the next task: the head of the highest non-empty class.
    pub fn pop(&mut self) -> Option<Task> {
        for prio in Priority::DRAIN_ORDER {
            if let Some(task) = self.classes[prio.index()].pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Removes and returns every task currently queued in one class.
    /// Tasks pushed while the batch executes land in the next pass.
    pub fn take_class(&mut self, prio: Priority) -> VecDeque<Task> {
        std::mem::take(&mut self.classes[prio.index()])
    }

    /// Total number of queued tasks across all classes.
    pub fn len(&self) -> usize {
        self.classes.iter().map(VecDeque::len).sum()
    }

    /// True when no task is queued in any class.
    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(VecDeque::is_empty)
    }
}

struct InboxState {
    classes: [Vec<RemoteTask>; Priority::COUNT],
    stopped: bool,
}

/// The cross-thread inbox: a mutex-guarded triple of priority lanes plus
/// the loop's stop flag. Producers push and notify; the loop sweeps the
/// whole inbox at the top of each tick and parks on the condvar when idle.
pub(crate) struct SharedInbox {
    state: Mutex<InboxState>,
    ready: Condvar,
}

impl SharedInbox {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InboxState {
                classes: [Vec::new(), Vec::new(), Vec::new()],
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, task: RemoteTask, prio: Priority) {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        state.classes[prio.index()].push(task);
        drop(state);
        self.ready.notify_all();
    }

    /// Moves every inbox task into the loop's local queues, preserving
    /// FIFO order within each class. Returns the number of tasks moved.
    pub(crate) fn drain_into(&self, queue: &mut PriorityTaskQueue) -> usize {
        let mut moved = 0;
        let mut state = self.state.lock().expect("inbox lock poisoned");
        for prio in [Priority::Low, Priority::Medium, Priority::High] {
            for task in state.classes[prio.index()].drain(..) {
                queue.push(task.into_local(), prio);
                moved += 1;
            }
        }
        moved
    }

    pub(crate) fn has_tasks(&self) -> bool {
        let state = self.state.lock().expect("inbox lock poisoned");
        state.classes.iter().any(|c| !c.is_empty())
    }

    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        state.stopped = true;
        drop(state);
        self.ready.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().expect("inbox lock poisoned").stopped
    }

    /// Blocks until a task arrives, stop is requested, or `deadline`
    /// passes (`None` waits indefinitely).
    pub(crate) fn park_until(&self, deadline: Option<Instant>) {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        while !state.stopped && state.classes.iter().all(Vec::is_empty) {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    let (guard, timeout) = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .expect("inbox lock poisoned");
                    state = guard;
                    if timeout.timed_out() {
                        return;
                    }
                }
                None => {
                    state = self.ready.wait(state).expect("inbox lock poisoned");
                }
            }
        }
    }
}
