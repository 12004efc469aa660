// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::Cell;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::sync::{WaitKey, WaitQueue, Waiters};

/// A one-shot broadcast flag.
///
/// Starts unset; [`set`] transitions it to set — irreversibly — and wakes
/// every waiter. Waiting on an already-set event completes immediately.
///
/// The waiter registry is a type parameter: the default [`WaitQueue`] allows
/// any number of concurrent waiters, while `Event<WaitCell>` is a leaner
/// variant for protocols with at most one waiter at a time.
///
/// [`set`]: Event::set
pub struct Event<W: Waiters = WaitQueue> {
    set: Cell<bool>,
    waiters: W,
}

impl<W: Waiters> Event<W> {
    pub fn new() -> Self {
        Self {
            set: Cell::new(false),
            waiters: W::default(),
        }
    }

    /// Set the event, waking all current waiters.
    ///
    /// Setting an already-set event is a no-op.
    pub fn set(&self) {
        if !self.set.replace(true) {
            let woken = self.waiters.wake_all();
            tracing::trace!(woken, "Event::set");
        }
    }

    /// Returns `true` once the event has been [`set`](Event::set).
    pub fn is_set(&self) -> bool {
        self.set.get()
    }

    /// Wait for the event to be set.
    ///
    /// Dropping the returned future before it completes deregisters the
    /// waiter.
    pub fn wait(&self) -> Wait<'_, W> {
        Wait {
            event: self,
            key: None,
        }
    }
}

impl<W: Waiters> Default for Event<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Waiters> fmt::Debug for Event<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("set", &self.set.get()).finish()
    }
}

/// Future returned by [`Event::wait`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Wait<'a, W: Waiters = WaitQueue> {
    event: &'a Event<W>,
    key: Option<WaitKey>,
}

impl<W: Waiters> Future for Wait<'_, W> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.event.is_set() {
            if let Some(key) = self.key.take() {
                self.event.waiters.remove(key);
            }
            return Poll::Ready(());
        }

        match self.key {
            // Still registered; refresh the stored waker.
            Some(key) if self.event.waiters.update(key, cx.waker()) => {}
            // First poll, or the registration was displaced (single-waiter
            // registry) without the event being set.
            _ => {
                let key = self.event.waiters.register(cx.waker());
                self.key = Some(key);
            }
        }
        Poll::Pending
    }
}

impl<W: Waiters> Drop for Wait<'_, W> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.event.waiters.remove(key);
        }
    }
}

impl<W: Waiters> fmt::Debug for Wait<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").field("registered", &self.key.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::sync::WaitCell;
    use crate::{run, spawn, yield_now};

    #[test]
    fn wait_on_a_set_event_is_immediate() {
        let event = Event::<WaitQueue>::new();
        event.set();
        assert!(event.is_set());
        run(async { event.wait().await });
    }

    #[test]
    fn set_wakes_all_waiters() {
        run(async {
            let event = Rc::new(Event::<WaitQueue>::new());
            let log = Rc::new(RefCell::new(Vec::new()));

            let waiters: Vec<_> = (0..3)
                .map(|i| {
                    let event = event.clone();
                    let log = log.clone();
                    spawn(async move {
                        event.wait().await;
                        log.borrow_mut().push(i);
                    })
                })
                .collect();

            // Let all three park before setting.
            yield_now().await;
            assert!(!event.is_set());
            event.set();

            for waiter in waiters {
                waiter.await.unwrap();
            }
            let mut woken = log.borrow().clone();
            woken.sort_unstable();
            assert_eq!(woken, [0, 1, 2]);
        });
    }

    #[test]
    fn dropping_a_wait_deregisters() {
        let event = Event::<WaitQueue>::new();

        run(async {
            let wait = event.wait();
            let mut wait = core::pin::pin!(wait);
            futures::future::poll_fn(|cx| {
                assert!(wait.as_mut().poll(cx).is_pending());
                core::task::Poll::Ready(())
            })
            .await;
        });

        // The future was dropped at the end of the block; no waiter remains.
        assert!(event.waiters.is_empty());
    }

    #[test]
    fn single_waiter_event() {
        let event = Rc::new(Event::<WaitCell>::new());

        let value = run({
            let event = event.clone();
            async move {
                let waiter = spawn({
                    let event = event.clone();
                    async move {
                        event.wait().await;
                        7
                    }
                });

                yield_now().await;
                event.set();
                waiter.await.unwrap()
            }
        });
        assert_eq!(value, 7);
    }
}
