//! Aggregate combinators over sets of promises.
//!
//! All three combinators attach a terminal continuation to every input
//! and settle a fresh aggregate promise on the first decisive event:
//! [`mk_all`] on the first rejection (or the last resolution), [`mk_any`]
//! on the first resolution (or the last rejection), [`mk_race`] on the
//! first settlement of either kind.
//!
//! The aggregate never owns the inputs; callers keep them alive until it
//! settles. Result and error vectors are positioned by input index, while
//! win/lose tie-breaks follow arrival order.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{mk_all, Promise};
//!
//! let inputs: Vec<Promise<i32, String>> = (0..3).map(|_| Promise::new()).collect();
//! let all = mk_all(&inputs, None);
//! all.then(|r| assert_eq!(r.value_or(vec![]), vec![1, 2, 3]));
//!
//! for (i, p) in inputs.iter().enumerate() {
//!     p.resolver().resolve(i as i32 + 1);
//! }
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use core_types::PromiseResult;

use crate::event_loop::ExecutorRef;
use crate::promise::Promise;

fn attach_input<T, E, F>(promise: &Promise<T, E>, callback: F, executor: &Option<ExecutorRef>)
where
    T: 'static,
    E: 'static,
    F: FnOnce(PromiseResult<T, E>) + 'static,
{
    match executor {
        Some(exec) => promise.then_on(callback, exec.clone()),
        None => promise.then(callback),
    }
}

/// Resolves with every input's value, in input order, once all inputs
/// resolve; rejects with the first error encountered.
///
/// An empty input resolves immediately with an empty vector. Continuations
/// on the inputs dispatch on `executor` when one is given.
pub fn mk_all<'a, T, E, I>(promises: I, executor: Option<ExecutorRef>) -> Promise<Vec<T>, E>
where
    T: 'static,
    E: 'static,
    I: IntoIterator<Item = &'a Promise<T, E>>,
{
    let inputs: Vec<&Promise<T, E>> = promises.into_iter().collect();
    let aggregate: Promise<Vec<T>, E> = Promise::new();

    if inputs.is_empty() {
        aggregate.resolver().resolve(Vec::new());
        return aggregate;
    }

    struct Ctx<T> {
        remaining: usize,
        results: Vec<Option<T>>,
    }

    let ctx = Rc::new(RefCell::new(Ctx {
        remaining: inputs.len(),
        results: (0..inputs.len()).map(|_| None).collect(),
    }));

    for (idx, promise) in inputs.into_iter().enumerate() {
        let ctx = ctx.clone();
        let resolver = aggregate.resolver();
        attach_input(
            promise,
            move |r: PromiseResult<T, E>| match r {
                PromiseResult::Error(e) => {
                    resolver.reject(e);
                }
                PromiseResult::Value(v) => {
                    let mut c = ctx.borrow_mut();
                    c.results[idx] = Some(v);
                    c.remaining -= 1;
                    if c.remaining == 0 {
                        let results: Vec<T> = c
                            .results
                            .iter_mut()
                            .map(|slot| slot.take().expect("every input resolved"))
                            .collect();
                        drop(c);
                        resolver.resolve(results);
                    }
                }
            },
            &executor,
        );
    }

    aggregate
}

/// Resolves with the first value to arrive; rejects with the vector of
/// all errors, positioned by input index, once every input has rejected.
///
/// # Panics
///
/// Panics on an empty input: "any of nothing" has no meaningful outcome.
pub fn mk_any<'a, T, E, I>(promises: I, executor: Option<ExecutorRef>) -> Promise<T, Vec<E>>
where
    T: 'static,
    E: 'static,
    I: IntoIterator<Item = &'a Promise<T, E>>,
{
    let inputs: Vec<&Promise<T, E>> = promises.into_iter().collect();
    assert!(
        !inputs.is_empty(),
        "mk_any requires a non-empty set of promises"
    );

    let aggregate: Promise<T, Vec<E>> = Promise::new();

    struct Ctx<E> {
        remaining_failures: usize,
        errors: Vec<Option<E>>,
    }

    let ctx = Rc::new(RefCell::new(Ctx {
        remaining_failures: inputs.len(),
        errors: (0..inputs.len()).map(|_| None).collect(),
    }));

    for (idx, promise) in inputs.into_iter().enumerate() {
        let ctx = ctx.clone();
        let resolver = aggregate.resolver();
        attach_input(
            promise,
            move |r: PromiseResult<T, E>| match r {
                PromiseResult::Value(v) => {
                    resolver.resolve(v);
                }
                PromiseResult::Error(e) => {
                    let mut c = ctx.borrow_mut();
                    c.errors[idx] = Some(e);
                    c.remaining_failures -= 1;
                    if c.remaining_failures == 0 {
                        let errors: Vec<E> = c
                            .errors
                            .iter_mut()
                            .map(|slot| slot.take().expect("every input rejected"))
                            .collect();
                        drop(c);
                        resolver.reject(errors);
                    }
                }
            },
            &executor,
        );
    }

    aggregate
}

/// Settles with the first input to settle, value or error alike.
///
/// # Panics
///
/// Panics on an empty input: a race with no contenders never finishes.
pub fn mk_race<'a, T, E, I>(promises: I, executor: Option<ExecutorRef>) -> Promise<T, E>
where
    T: 'static,
    E: 'static,
    I: IntoIterator<Item = &'a Promise<T, E>>,
{
    let inputs: Vec<&Promise<T, E>> = promises.into_iter().collect();
    assert!(
        !inputs.is_empty(),
        "mk_race requires a non-empty set of promises"
    );

    let aggregate: Promise<T, E> = Promise::new();

    for promise in inputs {
        let resolver = aggregate.resolver();
        attach_input(
            promise,
            move |r: PromiseResult<T, E>| match r {
                PromiseResult::Value(v) => {
                    resolver.resolve(v);
                }
                PromiseResult::Error(e) => {
                    resolver.reject(e);
                }
            },
            &executor,
        );
    }

    aggregate
}
