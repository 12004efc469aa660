// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives for tasks running on the same thread.
//!
//! The building blocks are two *waiter registries*: [`WaitCell`] holds at most
//! one [`Waker`], [`WaitQueue`] holds any number of them. Every higher-level
//! primitive in this module ([`Event`], [`Cancellation`], [`Mutex`] and the
//! channels) parks its waiters in one of the two; which one is a type
//! parameter defaulting to [`WaitQueue`].
//!
//! [`Waker`]: core::task::Waker

mod cancellation;
mod channel;
mod event;
mod mutex;
mod wait_cell;
mod wait_queue;

use core::task::Waker;

pub use cancellation::Cancellation;
pub use channel::{Channel, Container, Pop, PriorityQueue, Queue, Stack};
pub use event::{Event, Wait};
pub use mutex::{Lock, Mutex, MutexGuard};
pub use wait_cell::WaitCell;
pub use wait_queue::WaitQueue;

/// Identifies one registered waiter within a registry.
///
/// Keys are unique for the lifetime of the registry that issued them and are
/// never reused, so a stale key (one whose waiter has already been woken or
/// removed) is simply ignored by [`Waiters::update`] and [`Waiters::remove`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitKey(u64);

impl WaitKey {
    fn next(counter: &core::cell::Cell<u64>) -> Self {
        let key = counter.get();
        counter.set(key + 1);
        Self(key)
    }
}

/// A registry of suspended waiters.
///
/// Implemented by [`WaitCell`] (capacity one, late registrations displace
/// earlier ones) and [`WaitQueue`] (unbounded, wakes in reverse registration
/// order).
pub trait Waiters: Default {
    /// Register `waker`, returning a key that identifies the registration.
    fn register(&self, waker: &Waker) -> WaitKey;

    /// Replace the waker stored under `key`.
    ///
    /// Returns `false` if the registration is gone, i.e. the waiter has been
    /// woken (or displaced) in the meantime and the caller must re-check its
    /// wait condition before registering again.
    fn update(&self, key: WaitKey, waker: &Waker) -> bool;

    /// Remove the registration under `key` without waking it.
    ///
    /// Returns whether a registration was removed. Used by futures that are
    /// dropped while waiting.
    fn remove(&self, key: WaitKey) -> bool;

    /// Wake a single waiter, if any is registered.
    fn wake_one(&self) -> bool;

    /// Wake every registered waiter, returning how many were woken.
    fn wake_all(&self) -> usize;
}
