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
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::executor;
use crate::io::Interest;
use crate::reactor::syscall;

/// Wait until `duration` has elapsed.
///
/// A zero duration completes on first poll without touching the kernel; any
/// other duration creates a `CLOCK_MONOTONIC` timerfd here (reporting
/// creation failure inline) which is armed when the returned future is first
/// polled. The timer counts from that first poll, not from this call.
///
/// Dropping the future before it completes disarms it: the registration is
/// removed from the reactor and the timerfd is closed.
pub fn sleep(duration: Duration) -> io::Result<Sleep> {
    let fd = if duration.is_zero() {
        None
    } else {
        let fd = syscall(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })?;
        // Safety: `timerfd_create` returned a fresh descriptor we now own
        Some(unsafe { OwnedFd::from_raw_fd(fd) })
    };

    Ok(Sleep {
        fd,
        duration,
        state: State::Unarmed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unarmed,
    Armed,
    Done,
}

/// Future returned by [`sleep`].
///
/// This future is fused: once elapsed it stays ready.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Sleep {
    fd: Option<OwnedFd>,
    duration: Duration,
    state: State,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            State::Unarmed => {
                let Some(fd) = &self.fd else {
                    self.state = State::Done;
                    return Poll::Ready(());
                };

                let spec = libc::itimerspec {
                    // One-shot; no interval.
                    it_interval: libc::timespec {
                        tv_sec: 0,
                        tv_nsec: 0,
                    },
                    it_value: libc::timespec {
                        tv_sec: self.duration.as_secs() as libc::time_t,
                        tv_nsec: self.duration.subsec_nanos() as libc::c_long,
                    },
                };
                syscall(unsafe {
                    libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, core::ptr::null_mut())
                })
                .unwrap_or_else(|err| panic!("failed to arm timerfd: {err}"));

                let raw = fd.as_raw_fd();
                executor::with_reactor(|reactor| reactor.add(raw, Interest::READABLE, cx.waker()))
                    .unwrap_or_else(|err| panic!("failed to register timerfd: {err}"));

                tracing::trace!(fd = raw, duration = ?self.duration, "Sleep::armed");
                self.state = State::Armed;
                Poll::Pending
            }
            State::Armed => {
                // The reactor deregisters the fd before waking, so a still
                // present registration means this is a spurious wake.
                let raw = self.fd.as_ref().map(|fd| fd.as_raw_fd());
                let still_waiting = raw.is_some_and(|raw| {
                    executor::with_reactor(|reactor| reactor.update_waker(raw, cx.waker()))
                });
                if still_waiting {
                    Poll::Pending
                } else {
                    self.state = State::Done;
                    Poll::Ready(())
                }
            }
            State::Done => Poll::Ready(()),
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if self.state == State::Armed {
            if let Some(fd) = &self.fd {
                let raw = fd.as_raw_fd();
                executor::try_with_reactor(|reactor| reactor.remove(raw));
            }
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::run;
    use crate::test_util::trace_init;

    #[test]
    fn sleep_waits_at_least_the_duration() {
        let _trace = trace_init();

        let begin = Instant::now();
        run(async {
            sleep(Duration::from_millis(50)).unwrap().await;
        });
        assert!(begin.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn zero_duration_completes_immediately() {
        let slept = sleep(Duration::ZERO).unwrap();
        assert!(slept.fd.is_none());
        run(async move {
            slept.await;
        });
    }

    #[test]
    fn sleeps_run_concurrently() {
        // Two 40ms sleeps awaited back to back but armed at the same time
        // would take 80ms; spawned concurrently they take roughly 40ms.
        let begin = Instant::now();
        run(async {
            let a = crate::spawn(async {
                sleep(Duration::from_millis(40)).unwrap().await;
            });
            sleep(Duration::from_millis(40)).unwrap().await;
            a.await.unwrap();
        });

        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(80));
    }
}
