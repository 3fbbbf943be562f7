//! Unit tests for the coroutine bridge

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_runtime::{mk_all, spawn, EventLoop, Executor, Priority, Promise, PromiseStatus, Task};
use core_types::PromiseResult;

#[test]
fn spawned_bodies_run_before_spawn_returns() {
    let entered = Rc::new(Cell::new(false));
    let e = entered.clone();
    let promise = spawn(async move {
        e.set(true);
        PromiseResult::<i32, String>::value(1)
    });
    assert!(entered.get());
    assert!(promise.is_pending());
}

#[test]
fn spawn_can_return_the_error_arm() {
    let promise = spawn(async { PromiseResult::<(), String>::error("denied".into()) });
    assert_eq!(promise.status(), PromiseStatus::PreRejected);
}

#[test]
fn awaited_promises_resume_on_the_captured_loop() {
    let ev = EventLoop::new();
    let exec = ev.executor();
    let awaited: Promise<i32, String> = Promise::with_executor(exec.clone());
    let resolver = awaited.resolver();
    let outer = Rc::new(RefCell::new(None));

    // Spawn from inside a loop task so the suspension site captures the
    // running loop as its resumption executor.
    let o = outer.clone();
    ev.post(
        Task::new(move || {
            let promise = spawn(async move {
                let r = awaited.await;
                r.map(|v| v + 1)
            });
            *o.borrow_mut() = Some(promise);
        }),
        Priority::Low,
    );
    ev.run_until_idle().unwrap();

    let promise = outer.borrow_mut().take().unwrap();
    assert_eq!(promise.status(), PromiseStatus::Init);

    // Settle from outside a tick: the resumption is posted to the loop
    // captured at the suspension point, not run here.
    resolver.resolve(9);
    assert_eq!(promise.status(), PromiseStatus::Init);

    ev.run_until_idle().unwrap();
    assert!(promise.is_pending());

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    promise.then(move |r| s.set(r.value_or(0)));
    assert_eq!(seen.get(), 10);
}

#[test]
fn async_bodies_compose_with_combinators() {
    let inputs: Vec<Promise<i32, String>> = (0..3).map(|_| Promise::new()).collect();
    let resolvers: Vec<_> = inputs.iter().map(|p| p.resolver()).collect();

    let promise = spawn(async move {
        let all = mk_all(&inputs, None);
        let r = all.await;
        r.map(|vs| vs.into_iter().sum::<i32>())
    });

    for (i, r) in resolvers.iter().enumerate() {
        assert_eq!(promise.status(), PromiseStatus::Init);
        r.resolve(i as i32 + 1);
    }
    assert!(promise.is_pending());

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    promise.then(move |r| s.set(r.value_or(0)));
    assert_eq!(seen.get(), 6);
}

#[test]
fn cancelled_coroutines_release_their_awaited_promise() {
    let awaited: Promise<i32, String> = Promise::new();
    let resolver = awaited.resolver();
    let promise = spawn(async move { awaited.await });

    assert!(promise.resolver().cancel());
    // The frame is gone, and with it the awaited promise's only owner.
    assert_eq!(resolver.status(), None);
    assert!(!resolver.resolve(5));
    assert_eq!(promise.status(), PromiseStatus::Cancelled);
}

#[test]
fn chained_spawns_flatten_naturally() {
    let first: Promise<i32, String> = Promise::new();
    let resolver = first.resolver();

    let outer = spawn(async move {
        let doubled = spawn(async move { first.await.map(|v| v * 2) });
        doubled.await.map(|v| v + 1)
    });

    assert_eq!(outer.status(), PromiseStatus::Init);
    resolver.resolve(10);
    assert!(outer.is_pending());

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    outer.then(move |r| s.set(r.value_or(0)));
    assert_eq!(seen.get(), 21);
}
