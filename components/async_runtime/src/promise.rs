//! The promise state machine.
//!
//! A promise is a consumer handle over a shared state cell; a resolver is
//! the producer's weak handle over the same cell. The cell runs a small
//! lifecycle automaton that separates "the producer has settled" from "the
//! consumer's continuation has been dispatched", so settling and attaching
//! commute.
//!
//! Chains are built by the `then_*` family: each transforming attachment
//! links a fresh downstream cell behind the current one. Links are strong
//! backwards (`prev` keeps the upstream alive while the downstream waits)
//! and weak forwards (`next` is only used to push payloads and
//! cancellation downstream), so abandoning the tail of a chain releases
//! the whole chain.
//!
//! # Examples
//!
//! ```
//! use async_runtime::Promise;
//!
//! let promise: Promise<i32, String> = Promise::new();
//! let resolver = promise.resolver();
//!
//! promise.then(|r| assert_eq!(r.value_or(0), 42));
//! assert!(resolver.resolve(42));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use core_types::PromiseResult;
use tracing::trace;

use crate::coroutine::CoroutineHandle;
use crate::event_loop::ExecutorRef;
use crate::task_queue::{Priority, Task};

/// The lifecycle of a promise state.
///
/// `PreResolved`/`PreRejected` mean the producer has settled but the
/// consumer's continuation has not yet been dispatched. `Resolved`,
/// `Rejected` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    /// Neither settled nor cancelled.
    Init,
    /// Resolved by the producer; continuation not yet dispatched.
    PreResolved,
    /// Resolved and the continuation has been dispatched.
    Resolved,
    /// Rejected by the producer; continuation not yet dispatched.
    PreRejected,
    /// Rejected and the continuation has been dispatched.
    Rejected,
    /// Cancelled before the continuation could be dispatched.
    Cancelled,
}

impl PromiseStatus {
    /// Returns true for the terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PromiseStatus::Resolved | PromiseStatus::Rejected | PromiseStatus::Cancelled
        )
    }

    /// Returns true for the settled-but-not-dispatched states.
    pub fn is_pre_settled(self) -> bool {
        matches!(self, PromiseStatus::PreResolved | PromiseStatus::PreRejected)
    }
}

pub(crate) type Continuation<T, E> = Box<dyn FnOnce(PromiseResult<T, E>)>;
pub(crate) type CellRef<T, E> = Rc<RefCell<PromiseCell<T, E>>>;

/// How an attachment picks the executor its continuation runs on.
#[derive(Clone)]
pub(crate) enum ExecutorChoice {
    /// Keep whatever executor the cell is already bound to.
    Inherit,
    /// Bind the cell to this executor.
    Bind(ExecutorRef),
    /// Unbind the cell; the continuation runs inline at dispatch.
    Inline,
}

/// The shared mutable state behind a promise/resolver pair.
pub(crate) struct PromiseCell<T, E> {
    pub(crate) status: PromiseStatus,
    pub(crate) payload: Option<PromiseResult<T, E>>,
    pub(crate) continuation: Option<Continuation<T, E>>,
    pub(crate) executor: Option<ExecutorRef>,
    // Upstream link: strong, keeps the producer side alive while this
    // state waits on it.
    pub(crate) prev: Option<Rc<dyn ChainLink>>,
    // Downstream link: weak, used for payload propagation and forward
    // cancellation. Never extends the consumer's lifetime.
    pub(crate) next: Option<Weak<dyn ChainLink>>,
    // Set when this state fronts a spawned coroutine; cancelling the state
    // destroys the frame.
    pub(crate) frame: Option<CoroutineHandle>,
}

pub(crate) fn new_cell<T: 'static, E: 'static>(executor: Option<ExecutorRef>) -> CellRef<T, E> {
    Rc::new(RefCell::new(PromiseCell {
        status: PromiseStatus::Init,
        payload: None,
        continuation: None,
        executor,
        prev: None,
        next: None,
        frame: None,
    }))
}

/// Type-erased downstream surface of a chain cell.
///
/// An upstream continuation forwards its output through this interface
/// without knowing the downstream's concrete type; the payload crosses the
/// boundary as `Box<dyn Any>` and is re-typed on the other side.
pub(crate) trait ChainLink {
    /// Forward-cancellation entry point.
    fn cancel_link(self: Rc<Self>) -> bool;
    /// Settle this state from an upstream continuation's returned result.
    fn propagate_result(self: Rc<Self>, result: Box<dyn Any>);
    /// Adopt an inner promise returned by an upstream continuation: this
    /// state re-watches the inner state and settles when it does.
    fn propagate_promise(self: Rc<Self>, promise: Box<dyn Any>);
}

impl<T: 'static, E: 'static> ChainLink for RefCell<PromiseCell<T, E>> {
    fn cancel_link(self: Rc<Self>) -> bool {
        cancel_cell(&self)
    }

    fn propagate_result(self: Rc<Self>, result: Box<dyn Any>) {
        let result = result
            .downcast::<PromiseResult<T, E>>()
            .expect("chain link received a result of a foreign type");
        match *result {
            PromiseResult::Value(v) => {
                resolve_cell(&self, v);
            }
            PromiseResult::Error(e) => {
                reject_cell(&self, e);
            }
        }
    }

    fn propagate_promise(self: Rc<Self>, promise: Box<dyn Any>) {
        let inner = promise
            .downcast::<Promise<T, E>>()
            .expect("chain link received a promise of a foreign type");
        let inner_cell = inner.cell.clone();

        // Re-watch: this state's upstream becomes the inner promise, which
        // keeps the inner state alive until it settles and forwards here.
        // The inner handle itself is dropped at the end of this call.
        let up: Rc<dyn ChainLink> = inner_cell.clone();
        self.borrow_mut().prev = Some(up);
        let self_dyn: Rc<dyn ChainLink> = self.clone();
        let down: Weak<dyn ChainLink> = Rc::downgrade(&self_dyn);
        inner_cell.borrow_mut().next = Some(down);

        let weak_inner = Rc::downgrade(&inner_cell);
        let weak_self = Rc::downgrade(&self);
        let forward: Continuation<T, E> = Box::new(move |r| {
            if weak_inner.upgrade().is_none() {
                return;
            }
            if let Some(target) = weak_self.upgrade() {
                ChainLink::propagate_result(target, Box::new(r));
            }
        });
        attach_cell(&inner_cell, forward, ExecutorChoice::Inline);
    }
}

fn settle_cell<T: 'static, E: 'static>(
    cell: &RefCell<PromiseCell<T, E>>,
    payload: PromiseResult<T, E>,
    pre: PromiseStatus,
) -> bool {
    {
        let mut c = cell.borrow_mut();
        if c.status != PromiseStatus::Init {
            return false;
        }
        debug_assert!(c.payload.is_none());
        c.status = pre;
        c.payload = Some(payload);
    }
    try_dispatch(cell);
    true
}

pub(crate) fn resolve_cell<T: 'static, E: 'static>(
    cell: &RefCell<PromiseCell<T, E>>,
    value: T,
) -> bool {
    settle_cell(cell, PromiseResult::Value(value), PromiseStatus::PreResolved)
}

pub(crate) fn reject_cell<T: 'static, E: 'static>(
    cell: &RefCell<PromiseCell<T, E>>,
    error: E,
) -> bool {
    settle_cell(cell, PromiseResult::Error(error), PromiseStatus::PreRejected)
}

/// Cancels a state: legal from `Init` and the pre-settled states.
///
/// Releases the payload and continuation, destroys an attached coroutine
/// frame, then walks forward to the downstream state. Never walks
/// backwards.
pub(crate) fn cancel_cell<T: 'static, E: 'static>(cell: &RefCell<PromiseCell<T, E>>) -> bool {
    let (payload, continuation, frame, next) = {
        let mut c = cell.borrow_mut();
        match c.status {
            PromiseStatus::Init | PromiseStatus::PreResolved | PromiseStatus::PreRejected => {
                c.status = PromiseStatus::Cancelled;
                (
                    c.payload.take(),
                    c.continuation.take(),
                    c.frame.take(),
                    c.next.clone(),
                )
            }
            _ => return false,
        }
    };
    trace!("promise state cancelled");

    // Captured values may run destructors; none of them can observe a
    // borrow of this cell.
    drop(payload);
    drop(continuation);
    if let Some(frame) = frame {
        frame.destroy();
    }
    if let Some(next) = next.and_then(|w| w.upgrade()) {
        next.cancel_link();
    }
    true
}

/// Stores a continuation and immediately dispatches it if the payload is
/// already present.
pub(crate) fn attach_cell<T: 'static, E: 'static>(
    cell: &RefCell<PromiseCell<T, E>>,
    continuation: Continuation<T, E>,
    choice: ExecutorChoice,
) {
    {
        let mut c = cell.borrow_mut();
        match choice {
            ExecutorChoice::Inherit => {}
            ExecutorChoice::Bind(exec) => c.executor = Some(exec),
            ExecutorChoice::Inline => c.executor = None,
        }
        c.continuation = Some(continuation);
    }
    try_dispatch(cell);
}

/// Moves the payload and continuation out and runs the continuation on the
/// bound executor, or inline when the cell is unbound. Transitions the
/// pre-settled status to its terminal counterpart first.
fn try_dispatch<T: 'static, E: 'static>(cell: &RefCell<PromiseCell<T, E>>) {
    let (continuation, payload, executor) = {
        let mut c = cell.borrow_mut();
        if c.continuation.is_none() {
            return;
        }
        let terminal = match c.status {
            PromiseStatus::PreResolved => PromiseStatus::Resolved,
            PromiseStatus::PreRejected => PromiseStatus::Rejected,
            _ => return,
        };
        c.status = terminal;
        let continuation = c.continuation.take().expect("presence checked above");
        let payload = c
            .payload
            .take()
            .expect("pre-settled state always carries a payload");
        (continuation, payload, c.executor.clone())
    };

    match executor {
        Some(exec) => exec.post(Task::new(move || continuation(payload)), Priority::Low),
        None => continuation(payload),
    }
}

/// The consumer handle over a deferred result.
///
/// A promise uniquely owns its state; it is move-only. Attaching a
/// continuation and settling commute: the continuation runs exactly once
/// with the settled result regardless of order, on the state's bound
/// executor (or inline when unbound).
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, Promise};
///
/// let ev = EventLoop::new();
/// let promise: Promise<i32, String> = Promise::with_executor(ev.executor());
/// let resolver = promise.resolver();
///
/// promise.then(|r| assert_eq!(r.value_or(0), 7));
/// resolver.resolve(7);
/// ev.run_until_idle().unwrap();
/// ```
pub struct Promise<T: 'static, E: 'static> {
    pub(crate) cell: CellRef<T, E>,
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Creates an unsettled promise with no bound executor; continuations
    /// will run inline at dispatch.
    pub fn new() -> Self {
        Promise {
            cell: new_cell(None),
        }
    }

    /// Creates an unsettled promise whose continuations run on `executor`
    /// unless an attachment overrides it.
    pub fn with_executor(executor: ExecutorRef) -> Self {
        Promise {
            cell: new_cell(Some(executor)),
        }
    }

    /// Creates a promise already resolved with `value` (pre-settled: the
    /// payload is waiting for a continuation).
    pub fn resolved(value: T) -> Self {
        let promise = Promise::new();
        resolve_cell(&promise.cell, value);
        promise
    }

    /// Creates a promise already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let promise = Promise::new();
        reject_cell(&promise.cell, error);
        promise
    }

    /// Attaches a terminal continuation: observe the settled result, end
    /// the chain.
    pub fn then<F>(&self, callback: F)
    where
        F: FnOnce(PromiseResult<T, E>) + 'static,
    {
        self.attach_terminal(callback, ExecutorChoice::Inherit);
    }

    /// Like [`then`](Self::then), but binds the continuation to `executor`.
    pub fn then_on<F>(&self, callback: F, executor: ExecutorRef)
    where
        F: FnOnce(PromiseResult<T, E>) + 'static,
    {
        self.attach_terminal(callback, ExecutorChoice::Bind(executor));
    }

    /// Attaches a transforming continuation and links a downstream
    /// promise. The continuation's returned result settles the downstream
    /// state: value resolves it, error rejects it.
    pub fn then_map<U, F2, F>(&self, callback: F) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> PromiseResult<U, F2> + 'static,
    {
        self.attach_map(callback, ExecutorChoice::Inherit)
    }

    /// Like [`then_map`](Self::then_map), but binds the continuation to
    /// `executor` (the downstream promise inherits it too).
    pub fn then_map_on<U, F2, F>(&self, callback: F, executor: ExecutorRef) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> PromiseResult<U, F2> + 'static,
    {
        self.attach_map(callback, ExecutorChoice::Bind(executor))
    }

    /// Attaches a continuation that returns another promise. The inner
    /// promise is flattened: the downstream promise settles with whatever
    /// the inner one settles with, so no nested promise is ever observed.
    pub fn then_promise<U, F2, F>(&self, callback: F) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> Promise<U, F2> + 'static,
    {
        self.attach_flatten(callback, ExecutorChoice::Inherit)
    }

    /// Like [`then_promise`](Self::then_promise), but binds the
    /// continuation to `executor`.
    pub fn then_promise_on<U, F2, F>(&self, callback: F, executor: ExecutorRef) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> Promise<U, F2> + 'static,
    {
        self.attach_flatten(callback, ExecutorChoice::Bind(executor))
    }

    /// Returns the producer handle for this promise. Resolvers hold a weak
    /// reference and never extend the state's lifetime.
    pub fn resolver(&self) -> Resolver<T, E> {
        Resolver {
            cell: Rc::downgrade(&self.cell),
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> PromiseStatus {
        self.cell.borrow().status
    }

    /// True when the producer has settled but the continuation has not yet
    /// been dispatched.
    ///
    /// Note the deliberate sense of "pending" here: a promise that nobody
    /// has settled yet is *not* pending. The coroutine bridge relies on
    /// this to read already-available results without suspending.
    pub fn is_pending(&self) -> bool {
        self.status().is_pre_settled()
    }

    /// True when a continuation is currently attached.
    pub fn has_continuation(&self) -> bool {
        self.cell.borrow().continuation.is_some()
    }

    /// The executor this state is bound to, if any.
    pub fn executor(&self) -> Option<ExecutorRef> {
        self.cell.borrow().executor.clone()
    }

    pub(crate) fn attach_raw(&self, continuation: Continuation<T, E>, choice: ExecutorChoice) {
        attach_cell(&self.cell, continuation, choice);
    }

    fn attach_terminal<F>(&self, callback: F, choice: ExecutorChoice)
    where
        F: FnOnce(PromiseResult<T, E>) + 'static,
    {
        let weak = Rc::downgrade(&self.cell);
        let cb: Continuation<T, E> = Box::new(move |r| {
            // The chain may be gone by the time a posted continuation runs.
            if weak.upgrade().is_some() {
                callback(r);
            }
        });
        attach_cell(&self.cell, cb, choice);
    }

    fn attach_map<U, F2, F>(&self, callback: F, choice: ExecutorChoice) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> PromiseResult<U, F2> + 'static,
    {
        let down = self.link_downstream::<U, F2>(&choice);
        let weak = Rc::downgrade(&self.cell);
        let cb: Continuation<T, E> = Box::new(move |r| {
            let Some(cell) = weak.upgrade() else { return };
            let next = cell.borrow().next.as_ref().and_then(Weak::upgrade);
            let out = callback(r);
            // A dropped downstream means nobody wants the output; the
            // callback still ran for its effects.
            if let Some(next) = next {
                next.propagate_result(Box::new(out));
            }
        });
        attach_cell(&self.cell, cb, choice);
        Promise { cell: down }
    }

    fn attach_flatten<U, F2, F>(&self, callback: F, choice: ExecutorChoice) -> Promise<U, F2>
    where
        U: 'static,
        F2: 'static,
        F: FnOnce(PromiseResult<T, E>) -> Promise<U, F2> + 'static,
    {
        let down = self.link_downstream::<U, F2>(&choice);
        let weak = Rc::downgrade(&self.cell);
        let cb: Continuation<T, E> = Box::new(move |r| {
            let Some(cell) = weak.upgrade() else { return };
            let next = cell.borrow().next.as_ref().and_then(Weak::upgrade);
            let inner = callback(r);
            if let Some(next) = next {
                next.propagate_promise(Box::new(inner));
            }
        });
        attach_cell(&self.cell, cb, choice);
        Promise { cell: down }
    }

    /// Creates the downstream cell and wires the chain links: downstream
    /// holds the upstream strongly, upstream observes the downstream
    /// weakly.
    fn link_downstream<U, F2>(&self, choice: &ExecutorChoice) -> CellRef<U, F2>
    where
        U: 'static,
        F2: 'static,
    {
        let executor = match choice {
            ExecutorChoice::Bind(exec) => Some(exec.clone()),
            _ => self.cell.borrow().executor.clone(),
        };
        let down = new_cell::<U, F2>(executor);
        let up_link: Rc<dyn ChainLink> = self.cell.clone();
        down.borrow_mut().prev = Some(up_link);
        let down_dyn: Rc<dyn ChainLink> = down.clone();
        let down_link: Weak<dyn ChainLink> = Rc::downgrade(&down_dyn);
        self.cell.borrow_mut().next = Some(down_link);
        down
    }
}

impl<T: 'static, E: 'static> Default for Promise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// The producer handle: resolve, reject or cancel the promise it was taken
/// from.
///
/// Resolvers are clonable and hold only a weak reference; every operation
/// on a resolver whose promise chain has been dropped is a no-op returning
/// `false` (or `None` for [`status`](Self::status)). An orphaned producer
/// (a timer firing after the consumer gave up) must never resurrect or
/// outlive the chain.
pub struct Resolver<T: 'static, E: 'static> {
    cell: std::rc::Weak<RefCell<PromiseCell<T, E>>>,
}

impl<T: 'static, E: 'static> Resolver<T, E> {
    /// Resolves the promise with `value`. Returns true only on the first
    /// settlement of a live, uncancelled state.
    pub fn resolve(&self, value: T) -> bool {
        match self.cell.upgrade() {
            Some(cell) => resolve_cell(&cell, value),
            None => false,
        }
    }

    /// Rejects the promise with `error`. Same idempotence as
    /// [`resolve`](Self::resolve).
    pub fn reject(&self, error: E) -> bool {
        match self.cell.upgrade() {
            Some(cell) => reject_cell(&cell, error),
            None => false,
        }
    }

    /// Cancels the promise and its downstream chain. Returns true if a
    /// transition to `Cancelled` occurred.
    pub fn cancel(&self) -> bool {
        match self.cell.upgrade() {
            Some(cell) => cancel_cell(&cell),
            None => false,
        }
    }

    /// The promise's status, or `None` when the state has been dropped.
    pub fn status(&self) -> Option<PromiseStatus> {
        self.cell.upgrade().map(|cell| cell.borrow().status)
    }
}

impl<T: 'static, E: 'static> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            cell: self.cell.clone(),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
