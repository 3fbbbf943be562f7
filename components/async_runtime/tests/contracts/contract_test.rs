//! End-to-end behavioral contracts for the runtime.
//!
//! Each test drives a full producer/loop/consumer round trip through the
//! public API; the algebraic tests at the bottom pin down the laws the
//! chain machinery is expected to satisfy.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_runtime::{
    mk_all, mk_race, spawn, EventLoop, Executor, Priority, Promise, PromiseStatus, Task,
};
use core_types::PromiseResult;

type Observed<T, E> = Rc<RefCell<Option<PromiseResult<T, E>>>>;

fn observe<T: 'static, E: 'static>(promise: &Promise<T, E>) -> Observed<T, E> {
    let observed: Observed<T, E> = Rc::new(RefCell::new(None));
    let slot = observed.clone();
    promise.then(move |r| *slot.borrow_mut() = Some(r));
    observed
}

#[test]
fn immediate_resolve_then_attach_observes_after_one_tick() {
    let ev = EventLoop::new();
    let promise: Promise<i32, String> = Promise::with_executor(ev.executor());

    assert!(promise.resolver().resolve(42));
    let observed = observe(&promise);
    assert!(observed.borrow().is_none());

    ev.tick();
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::value(42)
    );
    assert_eq!(promise.status(), PromiseStatus::Resolved);
}

#[test]
fn attach_then_reject_observes_the_error() {
    let ev = EventLoop::new();
    let promise: Promise<i32, String> = Promise::with_executor(ev.executor());

    let observed = observe(&promise);
    assert!(promise.resolver().reject("ERR_X".into()));

    ev.run_until_idle().unwrap();
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::error("ERR_X".into())
    );
    assert_eq!(promise.status(), PromiseStatus::Rejected);
}

#[test]
fn chain_with_transform_stringifies() {
    let ev = EventLoop::new();
    let promise: Promise<i32, String> = Promise::with_executor(ev.executor());
    let stringified: Promise<String, String> = promise.then_map(|r| r.map(|v| v.to_string()));
    let observed = observe(&stringified);

    promise.resolver().resolve(456);
    ev.run_until_idle().unwrap();
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::value("456".into())
    );
}

#[test]
fn cancel_mid_chain_silences_every_stage() {
    let ev = EventLoop::new();
    let promise: Promise<i32, String> = Promise::with_executor(ev.executor());
    let f_ran = Rc::new(Cell::new(false));
    let g_ran = Rc::new(Cell::new(false));

    let fr = f_ran.clone();
    let second = promise.then_map(move |r| {
        fr.set(true);
        r
    });
    let gr = g_ran.clone();
    let third = second.then_map(move |r| {
        gr.set(true);
        r
    });

    assert!(promise.resolver().cancel());
    ev.run_until_idle().unwrap();

    assert!(!f_ran.get());
    assert!(!g_ran.get());
    assert_eq!(promise.status(), PromiseStatus::Cancelled);
    assert_eq!(second.status(), PromiseStatus::Cancelled);
    assert_eq!(third.status(), PromiseStatus::Cancelled);
}

#[test]
fn all_with_one_error_rejects_the_aggregate() {
    let ev = EventLoop::new();
    let inputs: Vec<Promise<i32, String>> = (0..3)
        .map(|_| Promise::with_executor(ev.executor()))
        .collect();
    let all = mk_all(&inputs, Some(ev.executor()));
    let observed = observe(&all);

    inputs[0].resolver().resolve(1);
    inputs[1].resolver().reject("E".into());
    inputs[2].resolver().resolve(3);

    ev.run_until_idle().unwrap();
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::error("E".into())
    );
}

#[test]
fn race_resolves_with_the_first_settler() {
    let ev = EventLoop::new();
    let inputs: Vec<Promise<i32, String>> = (0..2)
        .map(|_| Promise::with_executor(ev.executor()))
        .collect();
    let race = mk_race(&inputs, Some(ev.executor()));
    let observed = observe(&race);

    inputs[1].resolver().resolve(7);
    ev.run_until_idle().unwrap();
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::value(7)
    );

    inputs[0].resolver().resolve(1);
    ev.run_until_idle().unwrap();
    assert!(observed.borrow().is_none());
}

#[test]
fn awaiting_resumes_on_the_captured_executor() {
    let ev = EventLoop::new();
    let awaited: Promise<i32, String> = Promise::with_executor(ev.executor());
    let resolver = awaited.resolver();
    let spawned = Rc::new(RefCell::new(None));

    let s = spawned.clone();
    ev.post(
        Task::new(move || {
            *s.borrow_mut() = Some(spawn(async move {
                let r = awaited.await;
                r.map(|v| v * 3)
            }));
        }),
        Priority::Low,
    );
    ev.run_until_idle().unwrap();

    let outer = spawned.borrow_mut().take().unwrap();
    assert_eq!(outer.status(), PromiseStatus::Init);

    // The resumption is not inline: it lands on the loop captured at the
    // suspension point.
    resolver.resolve(9);
    assert_eq!(outer.status(), PromiseStatus::Init);

    ev.run_until_idle().unwrap();
    let observed = observe(&outer);
    assert_eq!(
        observed.borrow_mut().take().unwrap(),
        PromiseResult::value(27)
    );
}

#[test]
fn cancelling_an_awaiting_coroutine_frees_the_frame() {
    struct DropProbe(Rc<Cell<bool>>);
    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let locals_dropped = Rc::new(Cell::new(false));
    let probe = DropProbe(locals_dropped.clone());
    let never: Promise<i32, String> = Promise::new();
    let never_resolver = never.resolver();

    let outer = spawn(async move {
        let _probe = probe;
        never.await
    });

    assert!(outer.resolver().cancel());
    assert_eq!(outer.status(), PromiseStatus::Cancelled);
    assert!(locals_dropped.get());
    // The never-settled promise was released, not forcibly settled.
    assert_eq!(never_resolver.status(), None);
}

// --- Laws ---------------------------------------------------------------

#[test]
fn settle_and_attach_commute() {
    let run = |settle_first: bool| {
        let ev = EventLoop::new();
        let promise: Promise<i32, String> = Promise::with_executor(ev.executor());
        let observed;
        if settle_first {
            promise.resolver().resolve(5);
            observed = observe(&promise);
        } else {
            observed = observe(&promise);
            promise.resolver().resolve(5);
        }
        ev.run_until_idle().unwrap();
        let result = (observed.borrow_mut().take(), promise.status());
        result
    };

    assert_eq!(run(true), run(false));
}

#[test]
fn flattening_a_resolved_identity_is_the_identity() {
    let observe_direct = |input: PromiseResult<i32, String>| {
        let promise: Promise<i32, String> = Promise::new();
        let observed = observe(&promise);
        match input {
            PromiseResult::Value(v) => promise.resolver().resolve(v),
            PromiseResult::Error(e) => promise.resolver().reject(e),
        };
        let result = observed.borrow_mut().take();
        result
    };

    let observe_flattened = |input: PromiseResult<i32, String>| {
        let promise: Promise<i32, String> = Promise::new();
        let flat = promise.then_promise(|r| match r {
            PromiseResult::Value(v) => Promise::resolved(v),
            PromiseResult::Error(e) => Promise::rejected(e),
        });
        let observed = observe(&flat);
        match input {
            PromiseResult::Value(v) => promise.resolver().resolve(v),
            PromiseResult::Error(e) => promise.resolver().reject(e),
        };
        let result = observed.borrow_mut().take();
        result
    };

    assert_eq!(
        observe_direct(PromiseResult::value(5)),
        observe_flattened(PromiseResult::value(5))
    );
    assert_eq!(
        observe_direct(PromiseResult::error("E".into())),
        observe_flattened(PromiseResult::error("E".into()))
    );
}

#[test]
fn nested_all_matches_flat_all_modulo_nesting() {
    let flat_inputs: Vec<Promise<i32, String>> = (0..3).map(|_| Promise::new()).collect();
    let flat = mk_all(&flat_inputs, None);
    let flat_observed = observe(&flat);

    let nested_inputs: Vec<Promise<i32, String>> = (0..3).map(|_| Promise::new()).collect();
    let left = mk_all(&nested_inputs[0..2], None);
    let right = mk_all(&nested_inputs[2..3], None);
    let pair = [left, right];
    let nested = mk_all(&pair, None);
    let nested_observed = observe(&nested);

    for (i, p) in flat_inputs.iter().enumerate() {
        p.resolver().resolve(i as i32 + 1);
    }
    for (i, p) in nested_inputs.iter().enumerate() {
        p.resolver().resolve(i as i32 + 1);
    }

    let flat_values = flat_observed.borrow_mut().take().unwrap().into_value();
    let nested_values: Vec<i32> = nested_observed
        .borrow_mut()
        .take()
        .unwrap()
        .into_value()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(flat_values, nested_values);
    assert_eq!(nested_values, vec![1, 2, 3]);
}
