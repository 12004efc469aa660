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
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, ThreadId};

use crate::sync::{WaitKey, WaitQueue, Waiters};
use crate::task::{RcWake, waker_from};

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// A reference-counted task that many awaiters can share.
///
/// Cloning a `SharedTask` is cheap and does not duplicate work: the wrapped
/// future runs at most once, and every awaiter observes the same output
/// (cloned out per awaiter, hence the `T: Clone` bound). The body does not
/// run at construction — it is driven lazily, starting when any clone is
/// first polled.
///
/// There is no dedicated driver task. Whichever awaiter polls while the body
/// is unfinished advances it, and the waker the body sees broadcasts to
/// *all* registered awaiters — so if the driving awaiter is dropped mid-way,
/// the next wakeup reaches the survivors and one of them takes over.
///
/// Dropping the last clone (and any outstanding wakers) destroys the body,
/// run or not, exactly once.
///
/// A panicking body poisons the task: the awaiter that drove it resumes
/// unwinding with the original payload, and every other awaiter panics when
/// it observes the poisoned state.
pub struct SharedTask<T> {
    inner: Rc<Inner<T>>,
    key: Option<WaitKey>,
}

struct Inner<T> {
    stage: RefCell<Stage<T>>,
    waiters: WaitQueue,
    /// Set while an awaiter is driving the body, to keep a reentrant await
    /// (the body awaiting a clone of itself) from touching the stage.
    polling: Cell<bool>,
    thread: ThreadId,
}

enum Stage<T> {
    Pending(LocalBoxFuture<T>),
    Ready(T),
    Poisoned(Option<Box<dyn Any + Send + 'static>>),
}

/// What the current poll should do, decided under the stage borrow and acted
/// on outside it.
enum Step<T> {
    Yield(T),
    Raise(Option<Box<dyn Any + Send + 'static>>),
    Drive,
}

impl<T> SharedTask<T>
where
    T: Clone + 'static,
{
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            inner: Rc::new(Inner {
                stage: RefCell::new(Stage::Pending(Box::pin(future))),
                waiters: WaitQueue::new(),
                polling: Cell::new(false),
                thread: thread::current().id(),
            }),
            key: None,
        }
    }

    /// Returns `true` once the body has finished (successfully or by
    /// panicking).
    pub fn is_finished(&self) -> bool {
        if self.inner.polling.get() {
            return false;
        }
        !matches!(&*self.inner.stage.borrow(), Stage::Pending(_))
    }

    /// How many clones of this task exist.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            key: None,
        }
    }
}

impl<T> Drop for SharedTask<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.waiters.remove(key);
        }
    }
}

impl<T: 'static> RcWake for Inner<T> {
    fn wake_by_ref(self: &Rc<Self>) {
        // The body made progress; let every awaiter re-poll. One of them
        // will drive the body further.
        self.waiters.wake_all();
    }

    fn home_thread(&self) -> ThreadId {
        self.thread
    }
}

impl<T> Future for SharedTask<T>
where
    T: Clone + 'static,
{
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        loop {
            // While a poll further up the stack is driving the body, the
            // stage is borrowed; just park.
            if this.inner.polling.get() {
                register_or_update(&this.inner.waiters, &mut this.key, cx);
                return Poll::Pending;
            }

            let step = match &mut *this.inner.stage.borrow_mut() {
                Stage::Ready(value) => Step::Yield(value.clone()),
                Stage::Poisoned(payload) => Step::Raise(payload.take()),
                Stage::Pending(_) => Step::Drive,
            };

            match step {
                Step::Yield(value) => {
                    if let Some(key) = this.key.take() {
                        this.inner.waiters.remove(key);
                    }
                    return Poll::Ready(value);
                }
                Step::Raise(payload) => {
                    if let Some(key) = this.key.take() {
                        this.inner.waiters.remove(key);
                    }
                    match payload {
                        Some(payload) => panic::resume_unwind(payload),
                        None => panic!("shared task panicked"),
                    }
                }
                Step::Drive => {
                    this.inner.polling.set(true);
                    let broadcast = waker_from(this.inner.clone());
                    let mut body_cx = Context::from_waker(&broadcast);

                    let polled = panic::catch_unwind(AssertUnwindSafe(|| {
                        let mut stage = this.inner.stage.borrow_mut();
                        let Stage::Pending(body) = &mut *stage else {
                            unreachable!("stage changed while polling flag was set");
                        };
                        body.as_mut().poll(&mut body_cx)
                    }));
                    this.inner.polling.set(false);

                    match polled {
                        Ok(Poll::Pending) => {
                            register_or_update(&this.inner.waiters, &mut this.key, cx);
                            return Poll::Pending;
                        }
                        Ok(Poll::Ready(value)) => {
                            *this.inner.stage.borrow_mut() = Stage::Ready(value);
                            this.inner.waiters.wake_all();
                            // Loop around to yield the stored value.
                        }
                        Err(payload) => {
                            *this.inner.stage.borrow_mut() = Stage::Poisoned(Some(payload));
                            this.inner.waiters.wake_all();
                            // Loop around to re-raise for this awaiter.
                        }
                    }
                }
            }
        }
    }
}

fn register_or_update(waiters: &WaitQueue, key: &mut Option<WaitKey>, cx: &mut Context<'_>) {
    match key {
        Some(existing) if waiters.update(*existing, cx.waker()) => {}
        _ => *key = Some(waiters.register(cx.waker())),
    }
}

impl<T> fmt::Debug for SharedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTask")
            .field("handles", &Rc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}
