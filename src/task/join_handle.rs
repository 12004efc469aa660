// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::rc::Rc;

use crate::sync::{WaitCell, Waiters};
use crate::task::Id;

/// Owned permission to await the output of a spawned task.
///
/// Returned by [`spawn`]. Awaiting the handle yields the task's output once
/// the task completes, or a [`JoinError`] if the task body panicked.
///
/// Dropping a `JoinHandle` *detaches* the task: it keeps running to
/// completion on the executor, and its output (or captured panic) is silently
/// discarded.
///
/// # Panics
///
/// Polling the handle again after it has yielded the output is a programmer
/// error and panics.
///
/// [`spawn`]: crate::executor::spawn
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    id: Id,
    slot: Rc<JoinSlot<T>>,
    consumed: Cell<bool>,
}

/// Completion slot shared between a task and its [`JoinHandle`].
///
/// At most one waiter (the handle) ever parks here, so a [`WaitCell`] is
/// enough.
pub(crate) struct JoinSlot<T> {
    output: RefCell<Option<Result<T, JoinError>>>,
    waiter: WaitCell,
}

/// A spawned task failed to produce an output because its body panicked.
///
/// The captured panic payload can be recovered with [`JoinError::into_panic`]
/// (e.g. to resume unwinding with [`std::panic::resume_unwind`]).
pub struct JoinError {
    id: Id,
    payload: Box<dyn Any + Send + 'static>,
}

// === impl JoinHandle ===

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: Id, slot: Rc<JoinSlot<T>>) -> Self {
        Self {
            id,
            slot,
            consumed: Cell::new(false),
        }
    }

    /// The [`Id`] of the task this handle is associated with.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns `true` once the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.consumed.get() || self.slot.output.borrow().is_some()
    }

    /// Explicitly detach the task, letting it run to completion on its own.
    pub fn detach(self) {
        drop(self);
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.consumed.get(), "JoinHandle polled after completion");

        if let Some(output) = self.slot.output.borrow_mut().take() {
            self.consumed.set(true);
            return Poll::Ready(output);
        }

        self.slot.waiter.register(cx.waker());
        Poll::Pending
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// === impl JoinSlot ===

impl<T> JoinSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            output: RefCell::new(None),
            waiter: WaitCell::new(),
        }
    }

    /// Store the task's result and wake the joining task, if any.
    pub(crate) fn complete(&self, output: Result<T, JoinError>) {
        let prev = self.output.borrow_mut().replace(output);
        debug_assert!(prev.is_none(), "task completed twice");
        self.waiter.wake();
    }
}

// === impl JoinError ===

impl JoinError {
    pub(crate) fn panicked(id: Id, payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { id, payload }
    }

    /// The [`Id`] of the task that failed.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Consumes the error, returning the panic payload captured from the
    /// task body.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} panicked", self.id)
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinError").field("id", &self.id).finish_non_exhaustive()
    }
}

impl core::error::Error for JoinError {}
