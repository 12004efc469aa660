// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Timers, built on `timerfd` file descriptors registered with the reactor.
//!
//! There is no timer wheel: every [`Sleep`] owns its own `timerfd`, armed on
//! first poll and registered like any other readable descriptor. That keeps
//! timers on exactly the same wakeup path as sockets and signals.

mod sleep;
mod timeout;

pub use sleep::{Sleep, sleep};
pub use timeout::{Elapsed, Timeout, timeout};
