//! Asynchronous execution runtime: event loop, promises, coroutines.
//!
//! This crate provides a single-threaded cooperative runtime built from
//! three tightly coupled pieces:
//! - [`EventLoop`] - multiplexes timers and a prioritized task queue
//! - [`Promise`] / [`Resolver`] - a deferred-result state machine with
//!   chaining, cancellation and composition
//! - [`spawn`] and `promise.await` - the coroutine bridge between async
//!   blocks and promises
//!
//! # Overview
//!
//! A [`Promise`] is the consumer handle over a shared state cell; the
//! matching [`Resolver`] is a weak producer handle. Continuations attach
//! through the `then_*` family and dispatch on the state's bound
//! [`Executor`]. [`mk_all`], [`mk_any`] and [`mk_race`] compose sets of
//! promises; [`spawn`] fronts an async block with a promise whose
//! cancellation drops the suspended frame.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{EventLoop, Promise};
//!
//! let ev = EventLoop::new();
//! let promise: Promise<i32, String> = Promise::with_executor(ev.executor());
//! let resolver = promise.resolver();
//!
//! promise.then(|r| assert_eq!(r.value_or(0), 42));
//! resolver.resolve(42);
//! ev.run_until_idle().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod combinators;
pub mod coroutine;
pub mod event_loop;
pub mod promise;
pub mod task_queue;
mod waker;

pub use combinators::{mk_all, mk_any, mk_race};
pub use coroutine::{spawn, CoroutineHandle, PromiseAwaiter};
pub use event_loop::{
    EventLoop, Executor, ExecutorRef, Fd, IoEvent, IoInterest, IoProvider, LoopHandle, LoopStatus,
    RemoteExecutor, TimerEvent, TimerProvider,
};
pub use promise::{Promise, PromiseStatus, Resolver};
pub use task_queue::{Priority, PriorityTaskQueue, RemoteTask, RepeatingTask, Task};
