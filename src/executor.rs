// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-thread executor: a FIFO run queue of spawned tasks wrapped around
//! the [reactor](crate::reactor).
//!
//! Every thread that touches the runtime gets exactly one lazily-created
//! [`Executor`], alive until the thread exits. [`run`] drives a root future on
//! the caller's stack: it alternates between polling the root, draining the
//! run queue, and — when nothing is runnable — blocking in the reactor until
//! an I/O event, timer or signal makes something runnable again.

use core::cell::{Cell, OnceCell, RefCell};
use core::pin::pin;
use core::task::{Context, Poll};
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread::{self, ThreadId};

use crate::reactor::Reactor;
use crate::task::{JoinHandle, PollResult, RcWake, Runnable, TaskCell, waker_from};

/// How many run-queue tasks one tick polls before checking the root future
/// again.
const TICK_BUDGET: usize = 256;

thread_local! {
    static EXECUTOR: OnceCell<Executor> = const { OnceCell::new() };
}

/// The single-threaded executor owning this thread's run queue and reactor.
pub(crate) struct Executor {
    queue: RefCell<VecDeque<Rc<dyn Runnable>>>,
    reactor: RefCell<Reactor>,
    running: Cell<bool>,
}

/// Run `future` to completion on the current thread, returning its output.
///
/// This is the runtime's entry point: it blocks the calling thread, driving
/// `future` plus everything [`spawn`]ed while it runs, and returns once
/// `future` resolves. Tasks still pending at that point stay queued on the
/// thread's executor and resume during the next `run` call.
///
/// A panic in the root future unwinds out of `run` unchanged; panics in
/// spawned tasks are captured in their [`JoinHandle`]s instead.
///
/// # Panics
///
/// Panics when called from within a running executor (nested `run`), or if
/// the thread's reactor cannot be created.
pub fn run<F: Future>(future: F) -> F::Output {
    with(|exec| exec.block_on(future))
}

/// Spawn a task onto the current thread's executor.
///
/// The task runs concurrently with the caller whenever the executor is
/// driven by [`run`]; spawning before (or between) `run` calls only enqueues
/// it. The returned [`JoinHandle`] yields the task's output; dropping the
/// handle detaches the task.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
{
    with(|exec| {
        let (task, handle) = TaskCell::new(future);
        tracing::trace!(task.tid = handle.id().as_u64(), "spawn");
        exec.queue.borrow_mut().push_back(task);
        handle
    })
}

/// Put a woken task back on the run queue.
pub(crate) fn schedule(task: Rc<dyn Runnable>) {
    with(|exec| exec.queue.borrow_mut().push_back(task));
}

/// Access the current thread's reactor.
pub(crate) fn with_reactor<R>(f: impl FnOnce(&mut Reactor) -> R) -> R {
    with(|exec| f(&mut exec.reactor.borrow_mut()))
}

/// Like [`with_reactor`], but a no-op when the executor does not exist (or
/// the thread is being torn down). Used from `Drop` impls.
pub(crate) fn try_with_reactor<R>(f: impl FnOnce(&mut Reactor) -> R) -> Option<R> {
    EXECUTOR
        .try_with(|cell| cell.get().map(|exec| f(&mut exec.reactor.borrow_mut())))
        .ok()
        .flatten()
}

fn with<R>(f: impl FnOnce(&Executor) -> R) -> R {
    EXECUTOR.with(|cell| {
        let exec = cell.get_or_init(|| {
            let reactor = Reactor::new().expect("failed to create the reactor for this thread");
            Executor {
                queue: RefCell::new(VecDeque::new()),
                reactor: RefCell::new(reactor),
                running: Cell::new(false),
            }
        });
        f(exec)
    })
}

// === impl Executor ===

impl Executor {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        assert!(!self.running.get(), "nested `run` call on the same thread");
        self.running.set(true);
        // Reset the flag even if the root future panics so the thread's
        // executor stays usable.
        let _reset = ResetRunning(&self.running);

        let mut future = pin!(future);

        let root = Rc::new(RootWaker {
            woken: Cell::new(true),
            thread: thread::current().id(),
        });
        let waker = waker_from(root.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            if root.woken.replace(false) {
                tracing::trace!("polling root future");
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }

            // Drain spawned tasks; they may wake the root.
            if self.tick() {
                continue;
            }
            if root.woken.get() {
                continue;
            }

            // Nothing runnable: block until the reactor produces a wakeup.
            self.park();
        }
    }

    /// Poll up to [`TICK_BUDGET`] queued tasks.
    ///
    /// Returns `true` if the queue still has (or regained) runnable tasks.
    fn tick(&self) -> bool {
        for _ in 0..TICK_BUDGET {
            let Some(task) = self.queue.borrow_mut().pop_front() else {
                return false;
            };

            if task.clone().run() == PollResult::PendingSchedule {
                self.queue.borrow_mut().push_back(task);
            }
        }
        !self.queue.borrow_mut().is_empty()
    }

    /// Block in `epoll_wait` for one batch of events and dispatch them.
    ///
    /// Wakers and signal handlers are invoked *after* the reactor borrow is
    /// released, so a handler is free to manipulate registrations (including
    /// its own) without re-entering the reactor mid-dispatch.
    fn park(&self) {
        let ready = self
            .reactor
            .borrow_mut()
            .wait()
            .unwrap_or_else(|err| panic!("reactor failed to poll for events: {err}"));

        for fd in ready {
            let mut reactor = self.reactor.borrow_mut();
            if reactor.is_signal_fd(fd) {
                let handler = reactor
                    .next_signal()
                    .unwrap_or_else(|err| panic!("reactor failed to read signal info: {err}"));
                drop(reactor);
                if let Some(handler) = handler {
                    (handler.borrow_mut())();
                }
            } else if let Some(waker) = reactor.take_registration(fd) {
                drop(reactor);
                waker.wake();
            }
        }
    }
}

struct ResetRunning<'a>(&'a Cell<bool>);

impl Drop for ResetRunning<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Waker for the root future driven by [`run`]: sets a flag the block_on
/// loop checks after every tick.
struct RootWaker {
    woken: Cell<bool>,
    thread: ThreadId,
}

impl RcWake for RootWaker {
    fn wake_by_ref(self: &Rc<Self>) {
        self.woken.set(true);
    }

    fn home_thread(&self) -> ThreadId {
        self.thread
    }
}
