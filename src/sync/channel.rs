// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::RefCell;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::{BinaryHeap, VecDeque};

use crate::sync::{WaitKey, WaitQueue, Waiters};

/// An unbounded async producer/consumer channel over a pluggable container.
///
/// [`push`] always makes immediate progress (the channel is unbounded) and
/// wakes one parked consumer, if any. [`pop`] takes an element right away
/// when one is available and otherwise suspends until a producer delivers.
/// Which element "the next one" is belongs to the container: FIFO for
/// [`Queue`], LIFO for [`Stack`], largest-first for [`PriorityQueue`].
///
/// A consumer is only ever parked while the channel is empty; a push finding
/// elements already present wakes nobody extra, and a woken consumer that
/// loses its element to a quicker [`pop`] simply parks again.
///
/// [`push`]: Channel::push
/// [`pop`]: Channel::pop
pub struct Channel<C: Container, W: Waiters = WaitQueue> {
    items: RefCell<C>,
    waiters: W,
}

/// First-in, first-out channel.
pub type Queue<T> = Channel<VecDeque<T>>;

/// Last-in, first-out channel.
pub type Stack<T> = Channel<Vec<T>>;

/// Largest-element-first channel.
pub type PriorityQueue<T> = Channel<BinaryHeap<T>>;

/// The storage backing a [`Channel`]: what "push" and "pop the next element"
/// mean.
pub trait Container: Default {
    type Item;

    fn push(&mut self, item: Self::Item);

    /// Remove and return the next element, or `None` when empty.
    fn pop(&mut self) -> Option<Self::Item>;

    fn len(&self) -> usize;
}

impl<T> Container for VecDeque<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        self.push_back(item);
    }

    fn pop(&mut self) -> Option<T> {
        self.pop_front()
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}

impl<T> Container for Vec<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        Vec::push(self, item);
    }

    fn pop(&mut self) -> Option<T> {
        Vec::pop(self)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl<T: Ord> Container for BinaryHeap<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        BinaryHeap::push(self, item);
    }

    fn pop(&mut self) -> Option<T> {
        BinaryHeap::pop(self)
    }

    fn len(&self) -> usize {
        BinaryHeap::len(self)
    }
}

// === impl Channel ===

impl<C: Container, W: Waiters> Channel<C, W> {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(C::default()),
            waiters: W::default(),
        }
    }

    /// Insert an element and wake one parked consumer, if any.
    pub fn push(&self, item: C::Item) {
        self.items.borrow_mut().push(item);
        self.waiters.wake_one();
    }

    /// Take the next element, suspending while the channel is empty.
    ///
    /// Dropping the returned future before it completes deregisters the
    /// consumer.
    pub fn pop(&self) -> Pop<'_, C, W> {
        Pop {
            channel: self,
            key: None,
        }
    }

    /// Take the next element if one is available right now.
    pub fn try_pop(&self) -> Option<C::Item> {
        self.items.borrow_mut().pop()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Container, W: Waiters> Default for Channel<C, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Container, W: Waiters> fmt::Debug for Channel<C, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("len", &self.len()).finish()
    }
}

// === impl Pop ===

/// Future returned by [`Channel::pop`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Pop<'a, C: Container, W: Waiters = WaitQueue> {
    channel: &'a Channel<C, W>,
    key: Option<WaitKey>,
}

impl<C: Container, W: Waiters> Future for Pop<'_, C, W> {
    type Output = C::Item;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(item) = self.channel.try_pop() {
            if let Some(key) = self.key.take() {
                self.channel.waiters.remove(key);
            }
            return Poll::Ready(item);
        }

        match self.key {
            // Still parked; refresh the stored waker.
            Some(key) if self.channel.waiters.update(key, cx.waker()) => {}
            // First poll, or we were woken but a quicker consumer got the
            // element; park (again).
            _ => {
                let key = self.channel.waiters.register(cx.waker());
                self.key = Some(key);
            }
        }
        Poll::Pending
    }
}

impl<C: Container, W: Waiters> Drop for Pop<'_, C, W> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.channel.waiters.remove(key);
        }
    }
}
