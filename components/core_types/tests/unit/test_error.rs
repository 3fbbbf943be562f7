//! Unit tests for LoopError

use core_types::LoopError;

#[test]
fn errors_are_comparable() {
    assert_eq!(LoopError::AlreadyRunning, LoopError::AlreadyRunning);
    assert_ne!(LoopError::AlreadyRunning, LoopError::Terminated);
}

#[test]
fn errors_implement_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&LoopError::Terminated);
}

#[test]
fn display_is_human_readable() {
    assert!(LoopError::AlreadyRunning.to_string().contains("already running"));
    assert!(LoopError::Terminated.to_string().contains("stopped"));
}
