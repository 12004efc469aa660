// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::sync::event::{Event, Wait};
use crate::sync::WaitQueue;

/// A one-shot cancellation signal.
///
/// Mechanically this is an [`Event`] under a different name: [`trigger`] is
/// monotonic and irreversible, and wakes every task parked in [`wait`]. The
/// separate type marks intent — a `Cancellation` is the thing you hand to
/// [`with_cancellation`] to tear an operation down, not a general-purpose
/// event.
///
/// Cancellation is cooperative and is not an error: a cancelled operation is
/// discarded (its future dropped, deregistering any pending wakeups), and
/// [`with_cancellation`] reports the outcome as `None`.
///
/// [`trigger`]: Cancellation::trigger
/// [`wait`]: Cancellation::wait
/// [`with_cancellation`]: crate::future::with_cancellation
#[derive(Debug, Default)]
pub struct Cancellation {
    inner: Event<WaitQueue>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Event::new(),
        }
    }

    /// Trigger the cancellation, waking all waiters.
    ///
    /// Triggering more than once is a no-op.
    pub fn trigger(&self) {
        self.inner.set();
    }

    /// Returns `true` once [`trigger`](Cancellation::trigger) has been
    /// called.
    pub fn is_set(&self) -> bool {
        self.inner.is_set()
    }

    /// Wait for the cancellation to fire.
    ///
    /// Dropping the returned future deregisters the waiter.
    pub fn wait(&self) -> Wait<'_, WaitQueue> {
        self.inner.wait()
    }
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(if self.is_set() { "cancelled" } else { "armed" })
    }
}
