// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::io;

use pin_project::pin_project;

use crate::time::sleep::{Sleep, sleep};

/// Requires a future to complete before `duration` has elapsed.
///
/// This is [`with_cancellation`] with a [`Sleep`] as the cancellation
/// source: the inner future is dropped (deregistering any pending wakeups)
/// when the timer wins. The timer wins ties — a zero-duration timeout
/// elapses even if the inner future is ready on the first poll.
///
/// # Errors
///
/// Returns an error if the timerfd backing the timeout cannot be created.
///
/// [`with_cancellation`]: crate::future::with_cancellation
pub fn timeout<F>(duration: Duration, future: F) -> io::Result<Timeout<F::IntoFuture>>
where
    F: IntoFuture,
{
    Ok(Timeout {
        sleep: sleep(duration)?,
        future: future.into_future(),
    })
}

/// Future returned by [`timeout`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Timeout<F> {
    #[pin]
    sleep: Sleep,
    #[pin]
    future: F,
}

/// The timeout elapsed before the inner future completed.
#[derive(Debug, PartialEq, Eq)]
pub struct Elapsed(());

impl<F> Timeout<F> {
    /// Gets a reference to the underlying future in this timeout.
    pub fn get_ref(&self) -> &F {
        &self.future
    }

    /// Gets a mutable reference to the underlying future in this timeout.
    pub fn get_mut(&mut self) -> &mut F {
        &mut self.future
    }

    /// Consumes this timeout, returning the underlying future.
    pub fn into_inner(self) -> F {
        self.future
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.project();

        if me.sleep.poll(cx).is_ready() {
            return Poll::Ready(Err(Elapsed(())));
        }

        me.future.poll(cx).map(Ok)
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("deadline elapsed")
    }
}

impl core::error::Error for Elapsed {}
