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

/// A slot for a single registered [`Waker`].
///
/// This is the single-waiter counterpart of [`WaitQueue`]: it stores at most
/// one waker, and registering a new waker while one is stored displaces the
/// old one *without* waking it. It is the right registry when the protocol
/// guarantees at most one waiter at a time, such as the completion slot a
/// [`JoinHandle`] waits on.
///
/// [`WaitQueue`]: crate::sync::WaitQueue
/// [`JoinHandle`]: crate::task::JoinHandle
#[derive(Default)]
pub struct WaitCell {
    slot: RefCell<Option<(WaitKey, Waker)>>,
    next_key: Cell<u64>,
}

impl WaitCell {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(None),
            next_key: Cell::new(0),
        }
    }

    /// Returns `true` if no waker is currently stored.
    pub fn is_empty(&self) -> bool {
        self.slot.borrow().is_none()
    }

    /// Take the stored waker out of the cell and wake it.
    ///
    /// Returns `false` if the cell was empty.
    pub fn wake(&self) -> bool {
        let woken = self.slot.borrow_mut().take();
        match woken {
            Some((key, waker)) => {
                tracing::trace!(?key, "WaitCell::wake");
                waker.wake();
                true
            }
            None => false,
        }
    }
}

impl Waiters for WaitCell {
    fn register(&self, waker: &Waker) -> WaitKey {
        let key = WaitKey::next(&self.next_key);
        let displaced = self.slot.borrow_mut().replace((key, waker.clone()));
        if displaced.is_some() {
            tracing::debug!(?key, "WaitCell::register displaced a stored waker");
        }
        key
    }

    fn update(&self, key: WaitKey, waker: &Waker) -> bool {
        let mut slot = self.slot.borrow_mut();
        match &mut *slot {
            Some((stored, old)) if *stored == key => {
                if !old.will_wake(waker) {
                    *old = waker.clone();
                }
                true
            }
            _ => false,
        }
    }

    fn remove(&self, key: WaitKey) -> bool {
        let mut slot = self.slot.borrow_mut();
        match &*slot {
            Some((stored, _)) if *stored == key => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn wake_one(&self) -> bool {
        self.wake()
    }

    fn wake_all(&self) -> usize {
        usize::from(self.wake())
    }
}

impl fmt::Debug for WaitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitCell")
            .field("occupied", &!self.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::noop_waker;

    #[test]
    fn wake_takes_the_waker() {
        let cell = WaitCell::new();
        assert!(!cell.wake());

        let waker = noop_waker();
        cell.register(&waker);
        assert!(!cell.is_empty());
        assert!(cell.wake());
        assert!(cell.is_empty());
        assert!(!cell.wake());
    }

    #[test]
    fn register_displaces() {
        let cell = WaitCell::new();
        let waker = noop_waker();

        let first = cell.register(&waker);
        let second = cell.register(&waker);
        assert_ne!(first, second);

        // the displaced key no longer identifies a registration
        assert!(!cell.update(first, &waker));
        assert!(!cell.remove(first));
        assert!(cell.update(second, &waker));
        assert!(cell.remove(second));
        assert!(cell.is_empty());
    }
}
