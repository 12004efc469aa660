// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::task::Waker;

use crate::sync::{WaitKey, Waiters};

/// A queue of waiting tasks which can be woken one at a time or all at once.
///
/// Waiters are woken in reverse registration order: [`wake_one`] pops the most
/// recently registered waker. This gives the just-arrived waiter priority,
/// which is acceptable because waiters on the same primitive are
/// interchangeable, and keeps both registration and wakeup O(1). Primitives
/// that need broadcast semantics ([`Event`], [`Cancellation`]) use
/// [`wake_all`]; hand-off primitives ([`Mutex`], the channels) use
/// [`wake_one`].
///
/// [`wake_all`] drains the queue into a snapshot before waking anything, so a
/// woken waiter that immediately registers again (or triggers further wakes)
/// operates on a fresh queue rather than the one being drained.
///
/// Waking never resumes a task in place; it only schedules the task with the
/// executor. Resumption happens on the next executor tick.
///
/// [`wake_one`]: WaitQueue::wake_one
/// [`wake_all`]: WaitQueue::wake_all
/// [`Event`]: crate::sync::Event
/// [`Cancellation`]: crate::sync::Cancellation
/// [`Mutex`]: crate::sync::Mutex
#[derive(Default)]
pub struct WaitQueue {
    waiters: RefCell<Vec<(WaitKey, Waker)>>,
    next_key: Cell<u64>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: RefCell::new(Vec::new()),
            next_key: Cell::new(0),
        }
    }

    /// Number of currently registered waiters.
    pub fn len(&self) -> usize {
        self.waiters.borrow().len()
    }

    /// Returns `true` if no waiters are registered.
    pub fn is_empty(&self) -> bool {
        self.waiters.borrow().is_empty()
    }
}

impl Waiters for WaitQueue {
    fn register(&self, waker: &Waker) -> WaitKey {
        let key = WaitKey::next(&self.next_key);
        self.waiters.borrow_mut().push((key, waker.clone()));
        tracing::trace!(?key, "WaitQueue::register");
        key
    }

    fn update(&self, key: WaitKey, waker: &Waker) -> bool {
        let mut waiters = self.waiters.borrow_mut();
        match waiters.iter_mut().find(|(stored, _)| *stored == key) {
            Some((_, old)) => {
                if !old.will_wake(waker) {
                    *old = waker.clone();
                }
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: WaitKey) -> bool {
        let mut waiters = self.waiters.borrow_mut();
        match waiters.iter().position(|(stored, _)| *stored == key) {
            Some(idx) => {
                waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    fn wake_one(&self) -> bool {
        let woken = self.waiters.borrow_mut().pop();
        match woken {
            Some((key, waker)) => {
                tracing::trace!(?key, "WaitQueue::wake_one");
                waker.wake();
                true
            }
            None => false,
        }
    }

    fn wake_all(&self) -> usize {
        // Swap the queue out before waking so that re-registrations from
        // freshly woken tasks land in an empty queue instead of the snapshot
        // being drained.
        let snapshot = self.waiters.take();
        let woken = snapshot.len();
        for (key, waker) in snapshot.into_iter().rev() {
            tracing::trace!(?key, "WaitQueue::wake_all");
            waker.wake();
        }
        woken
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::task::{RawWaker, RawWakerVTable, Waker};

    use super::*;

    // A waker that appends a tag to a shared log when woken, so tests can
    // observe wake order.
    fn logging_waker(log: Rc<RefCell<Vec<u32>>>, tag: u32) -> Waker {
        struct Entry {
            log: Rc<RefCell<Vec<u32>>>,
            tag: u32,
        }

        unsafe fn clone(ptr: *const ()) -> RawWaker {
            // Safety: `ptr` was produced by `Rc::into_raw` below
            unsafe { Rc::increment_strong_count(ptr.cast::<Entry>()) };
            RawWaker::new(ptr, &VTABLE)
        }
        unsafe fn wake(ptr: *const ()) {
            // Safety: `ptr` was produced by `Rc::into_raw` below
            let entry = unsafe { Rc::from_raw(ptr.cast::<Entry>()) };
            entry.log.borrow_mut().push(entry.tag);
        }
        unsafe fn wake_by_ref(ptr: *const ()) {
            // Safety: `ptr` was produced by `Rc::into_raw` below
            let entry = unsafe { &*ptr.cast::<Entry>() };
            entry.log.borrow_mut().push(entry.tag);
        }
        unsafe fn drop_raw(ptr: *const ()) {
            // Safety: `ptr` was produced by `Rc::into_raw` below
            drop(unsafe { Rc::from_raw(ptr.cast::<Entry>()) });
        }

        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_raw);

        let entry = Rc::new(Entry { log, tag });
        // Safety: the vtable functions above uphold the RawWaker contract for
        // an `Rc`-backed waker that never leaves this thread
        unsafe { Waker::from_raw(RawWaker::new(Rc::into_raw(entry).cast(), &VTABLE)) }
    }

    #[test]
    fn wake_one_is_lifo() {
        let queue = WaitQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        queue.register(&logging_waker(log.clone(), 1));
        queue.register(&logging_waker(log.clone(), 2));
        queue.register(&logging_waker(log.clone(), 3));

        assert!(queue.wake_one());
        assert!(queue.wake_one());
        assert_eq!(*log.borrow(), [3, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wake_all_drains_in_reverse_order() {
        let queue = WaitQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in 1..=4 {
            queue.register(&logging_waker(log.clone(), tag));
        }

        assert_eq!(queue.wake_all(), 4);
        assert_eq!(*log.borrow(), [4, 3, 2, 1]);
        assert!(queue.is_empty());
        assert_eq!(queue.wake_all(), 0);
    }

    #[test]
    fn remove_erases_by_key() {
        let queue = WaitQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let _a = queue.register(&logging_waker(log.clone(), 1));
        let b = queue.register(&logging_waker(log.clone(), 2));

        assert!(queue.remove(b));
        assert!(!queue.remove(b));

        assert_eq!(queue.wake_all(), 1);
        assert_eq!(*log.borrow(), [1]);
    }

    #[test]
    fn update_fails_after_wake() {
        let queue = WaitQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let waker = logging_waker(log.clone(), 1);

        let key = queue.register(&waker);
        assert!(queue.update(key, &waker));
        queue.wake_one();
        assert!(!queue.update(key, &waker));
    }
}
