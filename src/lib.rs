// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-threaded cooperative async I/O runtime for Linux.
//!
//! All futures run on the thread that calls [`run`]; readiness for sockets and
//! timers is multiplexed through one `epoll` instance, timers are `timerfd`s
//! and signals are delivered through a `signalfd`. Because nothing ever
//! crosses a thread boundary, futures spawned onto the runtime do not need to
//! be `Send`, and none of the synchronization primitives take locks.
//!
//! Wakers handed out by this runtime are bound to the runtime thread; sending
//! one to another thread and waking it from there is not supported.
//!
//! ```no_run
//! use soloio::net::TcpListener;
//!
//! fn main() -> std::io::Result<()> {
//!     soloio::run(async {
//!         let listener = TcpListener::bind("127.0.0.1:8080".parse().unwrap())?;
//!         loop {
//!             let (stream, _peer) = listener.accept().await?;
//!             let _task = soloio::spawn(async move {
//!                 let mut buf = [0u8; 1024];
//!                 while let Ok(n) = stream.recv(&mut buf).await {
//!                     if n == 0 || stream.send(&buf[..n]).await.is_err() {
//!                         break;
//!                     }
//!                 }
//!             });
//!         }
//!     })
//! }
//! ```

pub mod executor;
pub mod future;
pub mod io;
pub mod net;
pub mod reactor;
mod shared;
pub mod sync;
pub mod task;
pub mod time;

pub use executor::{run, spawn};
pub use future::{gather, with_cancellation};
pub use reactor::{add_signal_handler, remove_signal_handler};
pub use shared::SharedTask;
pub use task::{JoinError, JoinHandle, yield_now};
pub use time::{sleep, timeout};

#[cfg(test)]
pub(crate) mod test_util {
    use core::task::Waker;

    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::util::SubscriberInitExt;

    /// Install a tracing subscriber driven by `RUST_LOG` for the duration of
    /// a test.
    pub(crate) fn trace_init() -> tracing::subscriber::DefaultGuard {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .set_default()
    }

    pub(crate) fn noop_waker() -> Waker {
        Waker::noop().clone()
    }
}
