// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::sync::{WaitKey, WaitQueue, Waiters};

/// An async mutex protecting a `T` across suspension points.
///
/// Everything here runs on one thread, so this is not about data races: it
/// enforces exclusive access to `T` across `.await` points, which [`Cell`]
/// and [`RefCell`] cannot do without panicking. Acquisition suspends instead.
///
/// Release is not a direct handoff. Dropping the [`MutexGuard`] marks the
/// mutex unlocked and wakes one waiter; until that waiter's task is next
/// polled, the mutex is observably unlocked and a third task can take it
/// first, sending the woken waiter back to the queue. That window is harmless
/// on a single thread and keeps the unlock path trivial.
///
/// [`RefCell`]: core::cell::RefCell
pub struct Mutex<T, W: Waiters = WaitQueue> {
    locked: Cell<bool>,
    waiters: W,
    value: UnsafeCell<T>,
}

impl<T, W: Waiters> Mutex<T, W> {
    pub fn new(value: T) -> Self {
        Self {
            locked: Cell::new(false),
            waiters: W::default(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the mutex, suspending until it is available.
    ///
    /// The returned guard releases the lock when dropped, waking at most one
    /// waiter. Dropping the `Lock` future before it completes deregisters
    /// the waiter.
    pub fn lock(&self) -> Lock<'_, T, W> {
        Lock {
            mutex: self,
            key: None,
        }
    }

    /// Acquire the mutex if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, W>> {
        if self.locked.replace(true) {
            None
        } else {
            Some(MutexGuard { mutex: self })
        }
    }

    /// Returns `true` while a [`MutexGuard`] is alive.
    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Consume the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Access the protected value through exclusive borrow, without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T: Default, W: Waiters> Default for Mutex<T, W> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, W: Waiters> fmt::Debug for Mutex<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.locked.get())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Lock<'a, T, W: Waiters = WaitQueue> {
    mutex: &'a Mutex<T, W>,
    key: Option<WaitKey>,
}

impl<'a, T, W: Waiters> Future for Lock<'a, T, W> {
    type Output = MutexGuard<'a, T, W>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.mutex.locked.replace(true) {
            if let Some(key) = self.key.take() {
                self.mutex.waiters.remove(key);
            }
            tracing::trace!("Mutex::lock acquired");
            return Poll::Ready(MutexGuard { mutex: self.mutex });
        }

        match self.key {
            // Still queued; refresh the stored waker.
            Some(key) if self.mutex.waiters.update(key, cx.waker()) => {}
            // First poll, or we were woken but another task took the lock
            // first; join the queue (again).
            _ => {
                let key = self.mutex.waiters.register(cx.waker());
                self.key = Some(key);
            }
        }
        Poll::Pending
    }
}

impl<T, W: Waiters> Drop for Lock<'_, T, W> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.mutex.waiters.remove(key);
        }
    }
}

/// Scoped ownership of a locked [`Mutex`]; unlocks on drop.
#[must_use = "holding a MutexGuard is what keeps the mutex locked"]
pub struct MutexGuard<'a, T, W: Waiters = WaitQueue> {
    mutex: &'a Mutex<T, W>,
}

impl<T, W: Waiters> Deref for MutexGuard<'_, T, W> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: a guard exists iff `locked` is set, and `try_lock`/`poll`
        // never hand out a second guard while it is; single-threaded, so no
        // other access can interleave.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, W: Waiters> DerefMut for MutexGuard<'_, T, W> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see `Deref`; the guard is unique.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T, W: Waiters> Drop for MutexGuard<'_, T, W> {
    fn drop(&mut self) {
        self.mutex.locked.set(false);
        self.mutex.waiters.wake_one();
        tracing::trace!("Mutex::unlock");
    }
}

impl<T: fmt::Debug, W: Waiters> fmt::Debug for MutexGuard<'_, T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::test_util::trace_init;
    use crate::{run, spawn, yield_now};

    #[test]
    fn guard_gives_access_and_releases() {
        let mutex = Mutex::<_, WaitQueue>::new(1);

        run(async {
            {
                let mut guard = mutex.lock().await;
                *guard += 1;
                assert!(mutex.is_locked());
                assert!(mutex.try_lock().is_none());
            }
            assert!(!mutex.is_locked());
        });

        assert_eq!(mutex.into_inner(), 2);
    }

    #[test]
    fn critical_sections_do_not_interleave() {
        let _trace = trace_init();

        run(async {
            let mutex = Rc::new(Mutex::<_, WaitQueue>::new(0u32));

            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let mutex = mutex.clone();
                    spawn(async move {
                        let mut guard = mutex.lock().await;
                        let seen = *guard;
                        // Suspend mid-critical-section; anyone else entering
                        // now would clobber `seen`.
                        yield_now().await;
                        *guard = seen + 1;
                    })
                })
                .collect();

            for task in tasks {
                task.await.unwrap();
            }
            assert_eq!(*mutex.lock().await, 4);
        });
    }

    #[test]
    fn unlock_wakes_the_most_recent_waiter() {
        run(async {
            let mutex = Rc::new(Mutex::<_, WaitQueue>::new(()));
            let order = Rc::new(RefCell::new(Vec::new()));

            let guard = mutex.lock().await;

            let waiters: Vec<_> = [1u32, 2]
                .into_iter()
                .map(|tag| {
                    let mutex = mutex.clone();
                    let order = order.clone();
                    spawn(async move {
                        drop(mutex.lock().await);
                        order.borrow_mut().push(tag);
                    })
                })
                .collect();

            // Both waiters queue up in spawn order, then the lock is
            // released: the later arrival gets it first.
            yield_now().await;
            drop(guard);

            for waiter in waiters {
                waiter.await.unwrap();
            }
            assert_eq!(*order.borrow(), [2, 1]);
        });
    }

    #[test]
    fn dropping_the_lock_future_leaves_no_waiter() {
        let mutex = Mutex::<_, WaitQueue>::new(());

        run(async {
            let _guard = mutex.lock().await;
            {
                let mut contender = core::pin::pin!(mutex.lock());
                futures::future::poll_fn(|cx| {
                    assert!(contender.as_mut().poll(cx).is_pending());
                    Poll::Ready(())
                })
                .await;
            }
            assert!(mutex.waiters.is_empty());
        });
    }
}
