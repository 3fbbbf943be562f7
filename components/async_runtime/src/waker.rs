//! Waker plumbing for coroutine frames.
//!
//! The runtime is single-threaded, so frames are reference-counted with
//! `Rc` and the standard `Arc`-based `Wake` helper does not apply; the
//! vtable below hand-rolls a waker over a `Weak` frame reference instead.
//! Waking a frame whose owning promise state was cancelled or dropped is
//! a no-op, and the weak reference means a stored waker never keeps a
//! frame alive on its own.
//!
//! Wakes must happen on the loop thread that owns the frame. The runtime
//! guarantees this as long as cross-thread settlement goes through
//! `RemoteExecutor::dispatch`, which is the concurrency contract of the
//! whole crate.

use std::mem::ManuallyDrop;
use std::rc::Weak;
use std::task::{RawWaker, RawWakerVTable, Waker};

use crate::coroutine::CoroFrame;

/// Builds the waker handed to a frame's `poll`; waking re-polls the frame.
pub(crate) fn frame_waker<T: 'static, E: 'static>(frame: Weak<CoroFrame<T, E>>) -> Waker {
    let raw = RawWaker::new(Weak::into_raw(frame).cast::<()>(), vtable::<T, E>());
    // Safety: the vtable functions below keep the Weak's reference count
    // balanced across clone/wake/drop, and the data pointer always comes
    // from Weak::into_raw of the matching frame type.
    unsafe { Waker::from_raw(raw) }
}

fn vtable<T: 'static, E: 'static>() -> &'static RawWakerVTable {
    &RawWakerVTable::new(
        clone_waker::<T, E>,
        wake::<T, E>,
        wake_by_ref::<T, E>,
        drop_waker::<T, E>,
    )
}

unsafe fn clone_waker<T: 'static, E: 'static>(data: *const ()) -> RawWaker {
    // Safety: called through the vtable; `data` was produced by
    // `Weak::into_raw`. ManuallyDrop keeps the original reference alive.
    let weak = unsafe { ManuallyDrop::new(Weak::from_raw(data.cast::<CoroFrame<T, E>>())) };
    let cloned: Weak<CoroFrame<T, E>> = (*weak).clone();
    RawWaker::new(Weak::into_raw(cloned).cast::<()>(), vtable::<T, E>())
}

unsafe fn wake<T: 'static, E: 'static>(data: *const ()) {
    // Safety: called through the vtable; consumes the reference this
    // waker owned.
    let weak = unsafe { Weak::from_raw(data.cast::<CoroFrame<T, E>>()) };
    if let Some(frame) = weak.upgrade() {
        frame.resume();
    }
}

unsafe fn wake_by_ref<T: 'static, E: 'static>(data: *const ()) {
    // Safety: called through the vtable; borrows the reference without
    // consuming it.
    let weak = unsafe { ManuallyDrop::new(Weak::from_raw(data.cast::<CoroFrame<T, E>>())) };
    if let Some(frame) = weak.upgrade() {
        frame.resume();
    }
}

unsafe fn drop_waker<T: 'static, E: 'static>(data: *const ()) {
    // Safety: called through the vtable; releases the reference this
    // waker owned.
    drop(unsafe { Weak::from_raw(data.cast::<CoroFrame<T, E>>()) });
}
