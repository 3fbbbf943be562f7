//! Coroutine bridge: async blocks as promises, promises as awaitables.
//!
//! [`spawn`] runs a future eagerly and fronts it with a [`Promise`]; the
//! promise's state owns the suspended frame, so cancelling the promise
//! destroys the frame and drops everything it captured. In the other
//! direction a `Promise` implements `IntoFuture`, so an async block can
//! `promise.await` and resume - on the event loop that was current at the
//! suspension point - once the promise settles.
//!
//! Panics from a spawned future are deliberately not converted into
//! rejections; they unwind to whoever is driving the frame. Async bodies
//! report failure by returning the error arm of their `PromiseResult`.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{spawn, Promise};
//!
//! let input: Promise<i32, String> = Promise::resolved(20);
//! let doubled = spawn(async move {
//!     let r = input.await;
//!     r.map(|v| v * 2)
//! });
//!
//! doubled.then(|r| assert_eq!(r.value_or(0), 40));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use core_types::PromiseResult;
use tracing::trace;

use crate::event_loop::EventLoop;
use crate::promise::{reject_cell, resolve_cell, ExecutorChoice, Promise, PromiseCell};
use crate::waker::frame_waker;

/// A spawned future plus the plumbing to settle its fronting promise.
///
/// The owning promise state holds the only strong reference (through
/// [`CoroutineHandle`]); wakers and continuations observe the frame
/// weakly.
pub(crate) struct CoroFrame<T: 'static, E: 'static> {
    future: RefCell<Option<Pin<Box<dyn Future<Output = PromiseResult<T, E>>>>>>,
    cell: Weak<RefCell<PromiseCell<T, E>>>,
    polling: Cell<bool>,
    notified: Cell<bool>,
    dead: Cell<bool>,
}

impl<T: 'static, E: 'static> CoroFrame<T, E> {
    /// Polls the frame once, looping while wakes arrive mid-poll. On
    /// completion, settles the owning state and releases the frame from
    /// it.
    pub(crate) fn resume(self: Rc<Self>) {
        if self.dead.get() {
            return;
        }
        if self.polling.get() {
            // A wake landed while we are already inside poll; re-poll
            // after the current pass instead of recursing.
            self.notified.set(true);
            return;
        }
        self.polling.set(true);
        loop {
            let taken = self.future.borrow_mut().take();
            let Some(mut future) = taken else { break };
            let waker = frame_waker(Rc::downgrade(&self));
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    if self.dead.get() {
                        // Destroyed from inside the poll; the frame slot
                        // stays empty and the future dies here.
                        break;
                    }
                    *self.future.borrow_mut() = Some(future);
                    if self.notified.replace(false) {
                        continue;
                    }
                    break;
                }
                Poll::Ready(result) => {
                    drop(future);
                    self.complete(result);
                    break;
                }
            }
        }
        self.polling.set(false);
    }

    fn complete(&self, result: PromiseResult<T, E>) {
        let Some(cell) = self.cell.upgrade() else {
            return;
        };
        // The frame is finished; release it from the state before
        // settling so the continuation observes a frame-free promise.
        cell.borrow_mut().frame = None;
        match result {
            PromiseResult::Value(v) => {
                resolve_cell(&cell, v);
            }
            PromiseResult::Error(e) => {
                reject_cell(&cell, e);
            }
        }
    }

    /// Drops the suspended future in place, running the destructors of
    /// everything it captured. Idempotent.
    pub(crate) fn destroy(&self) {
        if self.dead.replace(true) {
            return;
        }
        trace!("coroutine frame destroyed");
        let future = self.future.borrow_mut().take();
        drop(future);
    }
}

pub(crate) trait FrameCore {
    fn resume_frame(self: Rc<Self>);
    fn destroy_frame(&self);
}

impl<T: 'static, E: 'static> FrameCore for CoroFrame<T, E> {
    fn resume_frame(self: Rc<Self>) {
        self.resume();
    }

    fn destroy_frame(&self) {
        self.destroy();
    }
}

/// Opaque owner of a suspended coroutine frame.
///
/// Held by the promise state fronting a spawned future; cancelling that
/// state destroys the frame through this handle.
pub struct CoroutineHandle {
    frame: Rc<dyn FrameCore>,
}

impl CoroutineHandle {
    /// Polls the frame once more.
    pub fn resume(&self) {
        self.frame.clone().resume_frame();
    }

    /// Drops the suspended frame, releasing everything it captured.
    pub fn destroy(&self) {
        self.frame.destroy_frame();
    }
}

impl fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroutineHandle {{ ... }}")
    }
}

/// Runs `future` eagerly and returns a promise for its output.
///
/// The first poll happens inside this call, mirroring a coroutine that
/// starts executing as soon as it is invoked; if the future completes
/// without suspending, the returned promise is already settled (in the
/// pre-dispatched sense). Otherwise the frame stays suspended, owned by
/// the promise state, until an awaited promise resumes it or the state is
/// cancelled.
pub fn spawn<T, E, Fut>(future: Fut) -> Promise<T, E>
where
    T: 'static,
    E: 'static,
    Fut: Future<Output = PromiseResult<T, E>> + 'static,
{
    let promise: Promise<T, E> = Promise::new();
    let frame = Rc::new(CoroFrame {
        future: RefCell::new(Some(Box::pin(future))),
        cell: Rc::downgrade(&promise.cell),
        polling: Cell::new(false),
        notified: Cell::new(false),
        dead: Cell::new(false),
    });
    promise.cell.borrow_mut().frame = Some(CoroutineHandle {
        frame: frame.clone(),
    });
    trace!("coroutine frame spawned");
    frame.resume();
    promise
}

enum AwaitState<T: 'static, E: 'static> {
    Start(Promise<T, E>),
    Waiting(Promise<T, E>, Rc<RefCell<Option<PromiseResult<T, E>>>>),
    Done,
}

/// The future obtained by awaiting a [`Promise`].
///
/// Readiness uses the promise's pre-settled sense of "pending": a promise
/// whose payload is already available is read synchronously with an
/// inline continuation; anything else suspends until the promise settles,
/// resuming on the executor that was current at the suspension point (or
/// inline when none is installed).
pub struct PromiseAwaiter<T: 'static, E: 'static> {
    state: AwaitState<T, E>,
}

impl<T: 'static, E: 'static> Future for PromiseAwaiter<T, E> {
    type Output = PromiseResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, AwaitState::Done) {
            AwaitState::Start(promise) => {
                if promise.is_pending() {
                    // The payload is already there; an executor-less
                    // attachment dispatches it inline, right here.
                    let slot = Rc::new(RefCell::new(None));
                    let filler = slot.clone();
                    let weak = Rc::downgrade(&promise.cell);
                    promise.attach_raw(
                        Box::new(move |r| {
                            if weak.upgrade().is_some() {
                                *filler.borrow_mut() = Some(r);
                            }
                        }),
                        ExecutorChoice::Inline,
                    );
                    let result = slot
                        .borrow_mut()
                        .take()
                        .expect("pre-settled promise dispatches inline");
                    Poll::Ready(result)
                } else {
                    let slot = Rc::new(RefCell::new(None));
                    let filler = slot.clone();
                    let waker = cx.waker().clone();
                    let choice = match EventLoop::current_executor() {
                        Some(exec) => ExecutorChoice::Bind(exec),
                        None => ExecutorChoice::Inline,
                    };
                    let weak = Rc::downgrade(&promise.cell);
                    promise.attach_raw(
                        Box::new(move |r| {
                            if weak.upgrade().is_some() {
                                *filler.borrow_mut() = Some(r);
                                waker.wake();
                            }
                        }),
                        choice,
                    );
                    this.state = AwaitState::Waiting(promise, slot);
                    Poll::Pending
                }
            }
            AwaitState::Waiting(promise, slot) => {
                let taken = slot.borrow_mut().take();
                match taken {
                    Some(result) => Poll::Ready(result),
                    None => {
                        // Spurious poll; the continuation is already
                        // installed, just keep waiting.
                        this.state = AwaitState::Waiting(promise, slot);
                        Poll::Pending
                    }
                }
            }
            AwaitState::Done => panic!("PromiseAwaiter polled after completion"),
        }
    }
}

impl<T: 'static, E: 'static> IntoFuture for Promise<T, E> {
    type Output = PromiseResult<T, E>;
    type IntoFuture = PromiseAwaiter<T, E>;

    fn into_future(self) -> PromiseAwaiter<T, E> {
        PromiseAwaiter {
            state: AwaitState::Start(self),
        }
    }
}
