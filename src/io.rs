// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Readiness futures: the bridge between file descriptors and the reactor.
//!
//! [`readable`] and [`writable`] return a future that registers interest in
//! the descriptor on first poll and completes once the reactor has observed
//! the corresponding epoll event. Dropping the future before it completes
//! deregisters the descriptor — this is how every I/O operation in this
//! runtime is cancelled.
//!
//! These futures say nothing about *how much* I/O is possible; callers
//! perform the actual syscall after the future resolves (see
//! [`net`](crate::net)).

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

use bitflags::bitflags;

use crate::executor;

bitflags! {
    /// The direction of interest for a readiness registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u32 {
        const READABLE = libc::EPOLLIN as u32;
        const WRITABLE = libc::EPOLLOUT as u32;
    }
}

/// Wait until `fd` is ready for reading.
pub fn readable(fd: BorrowedFd<'_>) -> Readiness<'_> {
    Readiness::new(fd, Interest::READABLE)
}

/// Wait until `fd` is ready for writing.
pub fn writable(fd: BorrowedFd<'_>) -> Readiness<'_> {
    Readiness::new(fd, Interest::WRITABLE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Registered,
    Done,
}

/// Future returned by [`readable`] and [`writable`].
///
/// This future is fused: once ready it stays ready. It borrows the file
/// descriptor, so the descriptor cannot be closed while a registration is
/// outstanding.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Readiness<'fd> {
    fd: BorrowedFd<'fd>,
    interest: Interest,
    state: State,
}

impl<'fd> Readiness<'fd> {
    fn new(fd: BorrowedFd<'fd>, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            state: State::Init,
        }
    }
}

impl Future for Readiness<'_> {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let raw = self.fd.as_raw_fd();
        match self.state {
            State::Init => {
                executor::with_reactor(|reactor| reactor.add(raw, self.interest, cx.waker()))?;
                self.state = State::Registered;
                Poll::Pending
            }
            State::Registered => {
                // The reactor deregisters the fd before waking us, so "no
                // longer registered" means the event fired. Anything else is
                // a spurious wake; refresh the stored waker and keep waiting.
                let still_waiting =
                    executor::with_reactor(|reactor| reactor.update_waker(raw, cx.waker()));
                if still_waiting {
                    Poll::Pending
                } else {
                    self.state = State::Done;
                    Poll::Ready(Ok(()))
                }
            }
            State::Done => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for Readiness<'_> {
    fn drop(&mut self) {
        if self.state == State::Registered {
            let raw = self.fd.as_raw_fd();
            executor::try_with_reactor(|reactor| reactor.remove(raw));
        }
    }
}

impl fmt::Debug for Readiness<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("fd", &self.fd.as_raw_fd())
            .field("interest", &self.interest)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use core::task::Waker;
    use std::os::fd::{AsFd, FromRawFd, OwnedFd};

    use super::*;
    use crate::reactor::{syscall, syscall_len};
    use crate::test_util::trace_init;
    use crate::{run, spawn, yield_now};

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        syscall(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) })
            .unwrap();
        // Safety: pipe2 returned two fresh descriptors we now own
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn write_all(fd: &OwnedFd, bytes: &[u8]) {
        let n = syscall_len(unsafe {
            libc::write(fd.as_raw_fd(), bytes.as_ptr().cast(), bytes.len())
        })
        .unwrap();
        assert_eq!(n, bytes.len());
    }

    #[test]
    fn readable_completes_on_data() {
        let _trace = trace_init();
        let (rx, tx) = pipe();

        run(async move {
            let writer = spawn(async move {
                // Make sure the reader registers first.
                yield_now().await;
                write_all(&tx, b"x");
            });

            readable(rx.as_fd()).await.unwrap();

            let mut buf = [0u8; 8];
            let n = syscall_len(unsafe {
                libc::read(rx.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            })
            .unwrap();
            assert_eq!(&buf[..n], b"x");

            writer.await.unwrap();
        });
    }

    #[test]
    fn drop_deregisters() {
        let (rx, _tx) = pipe();
        let raw = rx.as_raw_fd();

        let mut fut = readable(rx.as_fd());
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);

        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(executor::with_reactor(|r| r.is_registered(raw)));

        drop(fut);
        assert!(!executor::with_reactor(|r| r.is_registered(raw)));
    }

    #[test]
    fn writable_is_immediate_on_an_empty_pipe() {
        let (_rx, tx) = pipe();

        run(async move {
            writable(tx.as_fd()).await.unwrap();
        });
    }
}
