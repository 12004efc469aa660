// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The readiness reactor: one `epoll` instance plus a `signalfd`, owned by
//! the thread's executor.
//!
//! Registrations are one-shot: every file descriptor maps to at most one
//! [`Waker`], and when the descriptor becomes ready the reactor removes the
//! registration (from its map *and* from epoll) before invoking the waker.
//! That ordering is load-bearing — the woken task may re-register the same
//! descriptor in the same direction immediately, and must not find stale
//! state. Cancellation is deregistration: a future that is dropped while
//! waiting calls [`Reactor::remove`] and the kernel event, if it ever
//! arrives, is never delivered anywhere.
//!
//! Signals are routed through a `signalfd` that is itself registered with
//! epoll, so handlers run on the runtime thread between event batches rather
//! than at arbitrary interrupt points.

use core::cell::RefCell;
use core::fmt;
use core::mem;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::task::Waker;

use crate::executor;
use crate::io::Interest;

/// Size of the `epoll_wait` batch buffer.
const EVENT_BATCH: usize = 32;

type SignalHandler = Rc<RefCell<dyn FnMut()>>;

/// Install `handler` for `signal` on the current thread's reactor.
///
/// While a handler is installed the signal is blocked for normal delivery and
/// routed through the reactor's `signalfd` instead; the handler runs
/// synchronously on the runtime thread between `epoll` batches. Installing a
/// second handler for the same signal replaces the first.
pub fn add_signal_handler<F>(signal: i32, handler: F) -> io::Result<()>
where
    F: FnMut() + 'static,
{
    let handler: SignalHandler = Rc::new(RefCell::new(handler));
    executor::with_reactor(|reactor| reactor.add_signal_handler(signal, handler))
}

/// Remove the handler for `signal` and unblock it.
pub fn remove_signal_handler(signal: i32) -> io::Result<()> {
    executor::with_reactor(|reactor| reactor.remove_signal_handler(signal))
}

pub(crate) struct Reactor {
    epoll: OwnedFd,
    signal_fd: OwnedFd,
    sigmask: libc::sigset_t,
    registrations: HashMap<RawFd, Waker>,
    handlers: HashMap<libc::c_int, SignalHandler>,
    events: Vec<libc::epoll_event>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = syscall(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        // Safety: `epoll_create1` returned a fresh descriptor we now own
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        // Safety: an all-zero sigset is a valid argument for sigemptyset
        let mut sigmask = unsafe { mem::zeroed::<libc::sigset_t>() };
        syscall(unsafe { libc::sigemptyset(&mut sigmask) })?;

        let signal_fd = syscall(unsafe { libc::signalfd(-1, &sigmask, libc::SFD_CLOEXEC) })?;
        // Safety: `signalfd` returned a fresh descriptor we now own
        let signal_fd = unsafe { OwnedFd::from_raw_fd(signal_fd) };

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: signal_fd.as_raw_fd() as u64,
        };
        syscall(unsafe {
            libc::epoll_ctl(
                epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                signal_fd.as_raw_fd(),
                &mut ev,
            )
        })?;

        tracing::trace!(
            epoll = epoll.as_raw_fd(),
            signal_fd = signal_fd.as_raw_fd(),
            "Reactor::new"
        );

        Ok(Self {
            epoll,
            signal_fd,
            sigmask,
            registrations: HashMap::new(),
            handlers: HashMap::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH],
        })
    }

    /// Register interest in `fd` and store the waker to invoke on readiness.
    ///
    /// At most one registration may exist per descriptor; registering a
    /// descriptor that is already registered is a programmer error.
    pub(crate) fn add(&mut self, fd: RawFd, interest: Interest, waker: &Waker) -> io::Result<()> {
        debug_assert!(
            !self.registrations.contains_key(&fd),
            "fd {fd} registered with the reactor twice",
        );

        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };
        syscall(unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev)
        })?;
        self.registrations.insert(fd, waker.clone());

        tracing::trace!(fd, ?interest, "Reactor::add");
        Ok(())
    }

    /// Replace the waker stored for `fd`.
    ///
    /// Returns `false` if the registration is gone, meaning the readiness
    /// event has already fired.
    pub(crate) fn update_waker(&mut self, fd: RawFd, waker: &Waker) -> bool {
        match self.registrations.get_mut(&fd) {
            Some(stored) => {
                if !stored.will_wake(waker) {
                    *stored = waker.clone();
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_registered(&self, fd: RawFd) -> bool {
        self.registrations.contains_key(&fd)
    }

    /// Drop the registration for `fd` without waking it.
    ///
    /// A no-op if the descriptor is not registered.
    pub(crate) fn remove(&mut self, fd: RawFd) -> bool {
        if self.registrations.remove(&fd).is_none() {
            return false;
        }
        self.epoll_del(fd);
        tracing::trace!(fd, "Reactor::remove");
        true
    }

    /// Take the registration for a descriptor that `wait` reported ready,
    /// removing it from the map and from epoll.
    ///
    /// The caller wakes the returned waker after releasing its borrow of the
    /// reactor.
    pub(crate) fn take_registration(&mut self, fd: RawFd) -> Option<Waker> {
        let waker = self.registrations.remove(&fd)?;
        self.epoll_del(fd);
        tracing::trace!(fd, "Reactor::take_registration");
        Some(waker)
    }

    fn epoll_del(&self, fd: RawFd) {
        // Losing a DEL (e.g. the fd was closed out from under us) leaves no
        // stale map state, so it is not fatal.
        if let Err(err) = syscall(unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                core::ptr::null_mut(),
            )
        }) {
            tracing::debug!(fd, %err, "EPOLL_CTL_DEL failed");
        }
    }

    pub(crate) fn add_signal_handler(
        &mut self,
        signal: libc::c_int,
        handler: SignalHandler,
    ) -> io::Result<()> {
        syscall(unsafe { libc::sigaddset(&mut self.sigmask, signal) })?;
        self.apply_sigmask()?;
        self.handlers.insert(signal, handler);
        tracing::trace!(signal, "Reactor::add_signal_handler");
        Ok(())
    }

    pub(crate) fn remove_signal_handler(&mut self, signal: libc::c_int) -> io::Result<()> {
        syscall(unsafe { libc::sigdelset(&mut self.sigmask, signal) })?;
        self.apply_sigmask()?;
        self.handlers.remove(&signal);
        tracing::trace!(signal, "Reactor::remove_signal_handler");
        Ok(())
    }

    fn apply_sigmask(&mut self) -> io::Result<()> {
        syscall(unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.sigmask, core::ptr::null_mut())
        })?;
        syscall(unsafe { libc::signalfd(self.signal_fd.as_raw_fd(), &self.sigmask, 0) })?;
        Ok(())
    }

    pub(crate) fn is_signal_fd(&self, fd: RawFd) -> bool {
        fd == self.signal_fd.as_raw_fd()
    }

    /// Read one `signalfd_siginfo` off the signalfd and look up its handler.
    ///
    /// A short read is a protocol violation and fatal. A signal without a
    /// handler (one delivered between `remove_signal_handler` and the mask
    /// update taking effect) is dropped.
    pub(crate) fn next_signal(&mut self) -> io::Result<Option<SignalHandler>> {
        // Safety: all-zero is a valid signalfd_siginfo and is fully
        // overwritten by the read below
        let mut info = unsafe { mem::zeroed::<libc::signalfd_siginfo>() };
        let want = mem::size_of::<libc::signalfd_siginfo>();

        loop {
            let n = unsafe {
                libc::read(
                    self.signal_fd.as_raw_fd(),
                    (&raw mut info).cast(),
                    want,
                )
            };
            if n == want as isize {
                break;
            }
            if n == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short read from signalfd",
            ));
        }

        let signal = info.ssi_signo as libc::c_int;
        tracing::trace!(signal, "Reactor::next_signal");

        let handler = self.handlers.get(&signal).cloned();
        if handler.is_none() {
            tracing::warn!(signal, "signal delivered without a handler");
        }
        Ok(handler)
    }

    /// Block until at least one event is ready and return the raw fds that
    /// fired.
    pub(crate) fn wait(&mut self) -> io::Result<Vec<RawFd>> {
        let n = loop {
            tracing::trace!("Reactor::wait");
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    -1,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        Ok(self.events[..n].iter().map(|ev| ev.u64 as RawFd).collect())
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("epoll", &self.epoll.as_raw_fd())
            .field("registrations", &self.registrations.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Convert a `-1`-on-error syscall return into an `io::Result`.
pub(crate) fn syscall(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Like [`syscall`], for syscalls returning `ssize_t`.
pub(crate) fn syscall_len(ret: isize) -> io::Result<usize> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}
