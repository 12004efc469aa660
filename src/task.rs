// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The spawned-task machinery.
//!
//! A future handed to [`spawn`] is wrapped in a [`TaskCell`]: a
//! reference-counted cell holding the future, a lifecycle state and the
//! completion slot its [`JoinHandle`] waits on. Wakers for the task are built
//! directly over the `Rc` — cloning a waker bumps the refcount, waking
//! enqueues the task with the thread's executor — so a suspended task stays
//! alive exactly as long as something can still wake it.
//!
//! [`spawn`]: crate::executor::spawn

mod id;
mod join_handle;
mod yield_now;

use core::any::type_name;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::mem::ManuallyDrop;
use core::pin::Pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, ThreadId};

pub use id::Id;
pub use join_handle::{JoinError, JoinHandle};
pub use yield_now::{YieldNow, yield_now};

use crate::executor;
use join_handle::JoinSlot;

/// Outcome of running a task for one poll.
///
/// Tells the executor how to proceed with the task: whether it can be dropped
/// or needs to go back on the run queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollResult {
    /// The task has completed. The executor drops its reference.
    Ready,

    /// The task is pending and parked; whoever intends to wake it holds a
    /// waker (and through it a reference). The executor drops its reference.
    Pending,

    /// The task woke itself during the poll. The executor re-enqueues it
    /// instead of dropping the reference.
    PendingSchedule,
}

/// The task's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Parked; not on the run queue. A wake transitions to `Scheduled`.
    Idle,
    /// On the run queue, waiting to be polled. Further wakes are no-ops.
    Scheduled,
    /// Currently being polled. A wake transitions to `Notified`.
    Running,
    /// Woken while being polled; goes straight back on the run queue.
    Notified,
    /// Ran to completion. Wakes are no-ops.
    Completed,
}

/// The current lifecycle stage of the future.
enum Stage<F: Future> {
    /// The future is still pending.
    Pending(F),
    /// The future has completed (or panicked); its output has been moved into
    /// the join slot.
    Done,
}

/// Anything the executor's run queue can drive.
pub(crate) trait Runnable {
    fn run(self: Rc<Self>) -> PollResult;
    fn id(&self) -> Id;
}

/// A spawned task: the future plus its bookkeeping, behind an `Rc`.
pub(crate) struct TaskCell<F: Future> {
    id: Id,
    state: Cell<State>,
    stage: RefCell<Stage<F>>,
    join: Rc<JoinSlot<F::Output>>,
    thread: ThreadId,
}

impl<F> TaskCell<F>
where
    F: Future + 'static,
{
    pub(crate) fn new(future: F) -> (Rc<Self>, JoinHandle<F::Output>) {
        let id = Id::next();
        let join = Rc::new(JoinSlot::new());

        let task = Rc::new(Self {
            id,
            state: Cell::new(State::Scheduled),
            stage: RefCell::new(Stage::Pending(future)),
            join: join.clone(),
            thread: thread::current().id(),
        });

        tracing::trace!(
            task.tid = id.as_u64(),
            task.output = %type_name::<F::Output>(),
            "TaskCell::new",
        );

        (task, JoinHandle::new(id, join))
    }

    /// Polls the future once, capturing a panic into the join slot.
    fn poll_stage(&self, cx: &mut Context<'_>) -> Poll<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut stage = self.stage.borrow_mut();
            let Stage::Pending(future) = &mut *stage else {
                unreachable!("task {} polled after completion", self.id);
            };
            // Safety: the future lives inside the `Rc`ed cell and is never
            // moved out of it until it is dropped, so it is effectively
            // pinned.
            let future = unsafe { Pin::new_unchecked(future) };
            future.poll(cx)
        }));

        match result {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(output)) => {
                *self.stage.borrow_mut() = Stage::Done;
                self.join.complete(Ok(output));
                Poll::Ready(())
            }
            Err(payload) => {
                tracing::debug!(task.tid = self.id.as_u64(), "task panicked");
                *self.stage.borrow_mut() = Stage::Done;
                self.join.complete(Err(JoinError::panicked(self.id, payload)));
                Poll::Ready(())
            }
        }
    }
}

impl<F> Runnable for TaskCell<F>
where
    F: Future + 'static,
{
    fn run(self: Rc<Self>) -> PollResult {
        match self.state.get() {
            State::Scheduled => self.state.set(State::Running),
            // Completed between scheduling and this tick; nothing to do.
            state => {
                tracing::trace!(task.tid = self.id.as_u64(), ?state, "stale run");
                return PollResult::Ready;
            }
        }

        let waker = waker_from(self.clone());
        let mut cx = Context::from_waker(&waker);

        tracing::trace!(task.tid = self.id.as_u64(), "Task::poll");
        match self.poll_stage(&mut cx) {
            Poll::Ready(()) => {
                self.state.set(State::Completed);
                PollResult::Ready
            }
            Poll::Pending if self.state.get() == State::Notified => {
                self.state.set(State::Scheduled);
                PollResult::PendingSchedule
            }
            Poll::Pending => {
                self.state.set(State::Idle);
                PollResult::Pending
            }
        }
    }

    fn id(&self) -> Id {
        self.id
    }
}

impl<F> RcWake for TaskCell<F>
where
    F: Future + 'static,
{
    fn wake_by_ref(self: &Rc<Self>) {
        match self.state.get() {
            State::Idle => {
                self.state.set(State::Scheduled);
                tracing::trace!(task.tid = self.id.as_u64(), "Task::wake");
                executor::schedule(self.clone());
            }
            State::Running => self.state.set(State::Notified),
            // Already queued or done; the wake is a no-op.
            State::Scheduled | State::Notified | State::Completed => {}
        }
    }

    fn home_thread(&self) -> ThreadId {
        self.thread
    }
}

impl<F: Future> fmt::Debug for TaskCell<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

// === waker plumbing ===

/// A value that can be woken through an `Rc` of itself.
///
/// [`waker_from`] turns an `Rc<W>` into a [`Waker`] whose clone/drop map onto
/// refcount operations. The resulting waker is bound to the runtime thread:
/// waking (or dropping) it elsewhere is a contract violation, checked in
/// debug builds.
pub(crate) trait RcWake: 'static {
    fn wake_by_ref(self: &Rc<Self>);

    /// The thread this value was created on.
    fn home_thread(&self) -> ThreadId;
}

pub(crate) fn waker_from<W: RcWake>(rc: Rc<W>) -> Waker {
    let ptr = Rc::into_raw(rc).cast::<()>();
    // Safety: the vtable below upholds the RawWaker contract as long as the
    // waker stays on the thread that created it, which `RcWake` requires.
    unsafe { Waker::from_raw(raw_waker::<W>(ptr)) }
}

fn raw_waker<W: RcWake>(ptr: *const ()) -> RawWaker {
    RawWaker::new(
        ptr,
        &RawWakerVTable::new(
            clone_waker::<W>,
            wake_by_val::<W>,
            wake_by_ref::<W>,
            drop_waker::<W>,
        ),
    )
}

unsafe fn clone_waker<W: RcWake>(ptr: *const ()) -> RawWaker {
    // Safety: `ptr` came out of `Rc::into_raw` in `waker_from`
    unsafe { Rc::increment_strong_count(ptr.cast::<W>()) };
    raw_waker::<W>(ptr)
}

unsafe fn wake_by_val<W: RcWake>(ptr: *const ()) {
    // Safety: `ptr` came out of `Rc::into_raw` in `waker_from`; waking by
    // value consumes this waker's reference.
    let rc = unsafe { Rc::from_raw(ptr.cast::<W>()) };
    debug_assert_eq!(
        rc.home_thread(),
        thread::current().id(),
        "a runtime waker was woken from a foreign thread",
    );
    W::wake_by_ref(&rc);
}

unsafe fn wake_by_ref<W: RcWake>(ptr: *const ()) {
    // Safety: `ptr` came out of `Rc::into_raw` in `waker_from`; this call
    // borrows rather than consumes the reference.
    let rc = unsafe { ManuallyDrop::new(Rc::from_raw(ptr.cast::<W>())) };
    debug_assert_eq!(
        rc.home_thread(),
        thread::current().id(),
        "a runtime waker was woken from a foreign thread",
    );
    W::wake_by_ref(&rc);
}

unsafe fn drop_waker<W: RcWake>(ptr: *const ()) {
    // Safety: `ptr` came out of `Rc::into_raw` in `waker_from`
    drop(unsafe { Rc::from_raw(ptr.cast::<W>()) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waker_refcounts() {
        struct Probe {
            woken: Cell<usize>,
            thread: ThreadId,
        }
        impl RcWake for Probe {
            fn wake_by_ref(self: &Rc<Self>) {
                self.woken.set(self.woken.get() + 1);
            }
            fn home_thread(&self) -> ThreadId {
                self.thread
            }
        }

        let probe = Rc::new(Probe {
            woken: Cell::new(0),
            thread: thread::current().id(),
        });

        let waker = waker_from(probe.clone());
        assert_eq!(Rc::strong_count(&probe), 2);

        let cloned = waker.clone();
        assert_eq!(Rc::strong_count(&probe), 3);

        cloned.wake_by_ref();
        assert_eq!(probe.woken.get(), 1);
        assert_eq!(Rc::strong_count(&probe), 3);

        cloned.wake();
        assert_eq!(probe.woken.get(), 2);
        assert_eq!(Rc::strong_count(&probe), 2);

        drop(waker);
        assert_eq!(Rc::strong_count(&probe), 1);
    }
}
