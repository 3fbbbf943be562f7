//! Unit tests for mk_all, mk_any and mk_race

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_runtime::{mk_all, mk_any, mk_race, EventLoop, Promise, PromiseStatus};

fn promises(n: usize) -> Vec<Promise<i32, String>> {
    (0..n).map(|_| Promise::new()).collect()
}

#[test]
fn all_waits_for_every_input() {
    let inputs = promises(3);
    let all = mk_all(&inputs, None);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    all.then(move |r| *s.borrow_mut() = Some(r));

    inputs[0].resolver().resolve(1);
    inputs[1].resolver().resolve(2);
    assert!(seen.borrow().is_none());

    inputs[2].resolver().resolve(3);
    let result = seen.borrow_mut().take().unwrap();
    assert_eq!(result.into_value(), vec![1, 2, 3]);
}

#[test]
fn all_short_circuits_on_the_first_rejection() {
    let inputs = promises(3);
    let all = mk_all(&inputs, None);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    all.then(move |r| *s.borrow_mut() = Some(r));

    inputs[1].resolver().reject("broke".into());
    let result = seen.borrow_mut().take().unwrap();
    assert_eq!(result.into_error(), "broke");

    // Late settlements of the other inputs are absorbed silently.
    inputs[0].resolver().resolve(1);
    inputs[2].resolver().reject("late".into());
    assert!(seen.borrow().is_none());
}

#[test]
fn all_dispatches_input_continuations_on_the_given_executor() {
    let ev = EventLoop::new();
    let inputs = promises(2);
    let all = mk_all(&inputs, Some(ev.executor()));
    let seen = Rc::new(Cell::new(false));
    let s = seen.clone();
    all.then(move |r| s.set(r.is_value()));

    inputs[0].resolver().resolve(1);
    inputs[1].resolver().resolve(2);
    // Input continuations are queued, not yet run.
    assert!(!seen.get());

    ev.run_until_idle().unwrap();
    assert!(seen.get());
}

#[test]
fn any_ignores_failures_until_one_succeeds() {
    let inputs = promises(3);
    let any = mk_any(&inputs, None);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    any.then(move |r| *s.borrow_mut() = Some(r));

    inputs[0].resolver().reject("a".into());
    inputs[1].resolver().reject("b".into());
    assert!(seen.borrow().is_none());

    inputs[2].resolver().resolve(42);
    let result = seen.borrow_mut().take().unwrap();
    assert_eq!(result.into_value(), 42);
}

#[test]
fn any_collects_every_error_by_input_index() {
    let inputs = promises(3);
    let any = mk_any(&inputs, None);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    any.then(move |r| *s.borrow_mut() = Some(r));

    inputs[2].resolver().reject("c".into());
    inputs[0].resolver().reject("a".into());
    inputs[1].resolver().reject("b".into());

    let result = seen.borrow_mut().take().unwrap();
    assert_eq!(
        result.into_error(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[test]
fn race_first_settlement_wins_either_way() {
    let inputs = promises(2);
    let race = mk_race(&inputs, None);
    assert_eq!(race.status(), PromiseStatus::Init);

    inputs[0].resolver().resolve(1);
    assert!(race.is_pending());

    // The loser's settlement is a no-op on the aggregate.
    inputs[1].resolver().reject("slow".into());

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    race.then(move |r| s.set(r.value_or(0)));
    assert_eq!(seen.get(), 1);
}

#[test]
fn aggregates_do_not_own_their_inputs() {
    let inputs = promises(2);
    let all = mk_all(&inputs, None);

    // Dropping the inputs drops the only strong refs to their states; the
    // attached combinator continuations go with them and the aggregate
    // simply never settles.
    drop(inputs);
    assert_eq!(all.status(), PromiseStatus::Init);
}
