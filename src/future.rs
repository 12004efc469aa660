// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Combinators composing several futures into one.
//!
//! [`gather`] awaits a tuple of heterogeneous futures concurrently and
//! yields all their outputs; [`with_cancellation`] races a future against a
//! [`Cancellation`] and yields an `Option`. Both cancel their losing branch
//! the way everything in this runtime is cancelled: by dropping it, which
//! deregisters any pending wakeups.

use core::pin::Pin;
use core::task::{Context, Poll};

use pin_project::pin_project;

use crate::sync::{Cancellation, Wait, WaitQueue};

/// Await every future in the tuple concurrently, yielding all their outputs
/// in declaration order.
///
/// Completion order is arbitrary; the output tuple's i-th element is exactly
/// what awaiting the i-th future alone would have produced. There is no
/// fail-fast: fallible futures place their `Result` in their slot and the
/// caller inspects them when unpacking. Dropping the gather drops (and
/// thereby cancels) every still-pending child.
///
/// Supported for tuples of 2 through 8 futures.
///
/// ```no_run
/// # soloio::run(async {
/// let (a, b) = soloio::gather((async { 1 }, async { "two" })).await;
/// # });
/// ```
pub fn gather<T: GatherTuple>(futures: T) -> T::Gather {
    futures.into_gather()
}

/// A tuple of futures that [`gather`] can await as one.
pub trait GatherTuple {
    type Gather: Future;

    fn into_gather(self) -> Self::Gather;
}

/// A future that may already have completed, buffering its output until the
/// whole gather is done.
#[pin_project(project = MaybeDoneProj)]
enum MaybeDone<F: Future> {
    Pending(#[pin] F),
    Done(Option<F::Output>),
}

impl<F: Future> MaybeDone<F> {
    /// Drive the child one step; returns `true` once its output is buffered.
    fn poll_done(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> bool {
        match self.as_mut().project() {
            MaybeDoneProj::Pending(future) => match future.poll(cx) {
                Poll::Ready(output) => {
                    self.set(MaybeDone::Done(Some(output)));
                    true
                }
                Poll::Pending => false,
            },
            MaybeDoneProj::Done(_) => true,
        }
    }

    fn take(self: Pin<&mut Self>) -> F::Output {
        match self.project() {
            MaybeDoneProj::Done(output) => {
                output.take().expect("gather output already taken")
            }
            MaybeDoneProj::Pending(_) => unreachable!("gather child still pending"),
        }
    }
}

macro_rules! gather_tuple {
    ($Gather:ident => $(($F:ident, $field:ident, $idx:tt)),+) => {
        #[pin_project]
        #[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
        pub struct $Gather<$($F: Future),+> {
            $( #[pin] $field: MaybeDone<$F>, )+
        }

        impl<$($F: Future),+> Future for $Gather<$($F),+> {
            type Output = ($($F::Output,)+);

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let mut all_done = true;
                let mut me = self.as_mut().project();
                $( all_done &= me.$field.as_mut().poll_done(cx); )+

                if all_done {
                    let me = self.project();
                    Poll::Ready(($( me.$field.take(), )+))
                } else {
                    Poll::Pending
                }
            }
        }

        impl<$($F: Future),+> GatherTuple for ($($F,)+) {
            type Gather = $Gather<$($F),+>;

            fn into_gather(self) -> Self::Gather {
                $Gather {
                    $( $field: MaybeDone::Pending(self.$idx), )+
                }
            }
        }
    };
}

gather_tuple!(Gather2 => (A, a, 0), (B, b, 1));
gather_tuple!(Gather3 => (A, a, 0), (B, b, 1), (C, c, 2));
gather_tuple!(Gather4 => (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3));
gather_tuple!(Gather5 => (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4));
gather_tuple!(Gather6 => (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5));
gather_tuple!(Gather7 => (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5), (G, g, 6));
gather_tuple!(Gather8 => (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5), (G, g, 6), (H, h, 7));

/// Race `future` against `cancel`.
///
/// Yields `Some(output)` if the future completes first and `None` if the
/// cancellation fires first. A cancellation that is already set wins the
/// race outright, even against a future that is ready on the first poll; at
/// most one of the two outcomes is ever reported.
///
/// The losing branch is torn down by dropping it when the combinator itself
/// is dropped. Cancellation is not a failure — `None` is the normal
/// "cancelled" outcome.
pub fn with_cancellation<'c, F>(
    future: F,
    cancel: &'c Cancellation,
) -> WithCancellation<'c, F::IntoFuture>
where
    F: IntoFuture,
{
    WithCancellation {
        wait: cancel.wait(),
        future: future.into_future(),
    }
}

/// Future returned by [`with_cancellation`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct WithCancellation<'c, F> {
    #[pin]
    wait: Wait<'c, WaitQueue>,
    #[pin]
    future: F,
}

impl<F: Future> Future for WithCancellation<'_, F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.project();

        // The cancellation wins ties.
        if me.wait.poll(cx).is_ready() {
            return Poll::Ready(None);
        }

        me.future.poll(cx).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicI32, Ordering};
    use core::time::Duration;
    use std::rc::Rc;

    use super::*;
    use crate::sync::Queue;
    use crate::test_util::trace_init;
    use crate::time::{sleep, timeout};
    use crate::{run, spawn};

    #[test]
    fn gather_mixed_shapes() {
        let _trace = trace_init();

        static GLOBAL: AtomicI32 = AtomicI32::new(30);

        let (a, b, c, d, e, f) = run(async {
            let slow = async {
                sleep(Duration::from_nanos(1)).unwrap().await;
                40
            };

            gather((
                async { 10 },
                async { Box::new(20) },
                async { &GLOBAL },
                async {},
                slow,
                sleep(Duration::from_nanos(10)).unwrap(),
            ))
            .await
        });

        assert_eq!(a, 10);
        assert_eq!(*b, 20);
        assert!(core::ptr::eq(c, &GLOBAL));
        assert_eq!(d, ());
        assert_eq!(e, 40);
        assert_eq!(f, ());
        c.store(31, Ordering::Relaxed);
        assert_eq!(GLOBAL.load(Ordering::Relaxed), 31);
    }

    #[test]
    fn gather_outputs_are_in_declaration_order() {
        // The first future finishes last; its output still comes first.
        let (a, b) = run(async {
            gather((
                async {
                    sleep(Duration::from_millis(10)).unwrap().await;
                    1
                },
                async { 2 },
            ))
            .await
        });
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn gather_has_no_fail_fast() {
        let (a, b) = run(async {
            gather((
                async { Err::<u32, &str>("nope") },
                async {
                    sleep(Duration::from_millis(1)).unwrap().await;
                    7u32
                },
            ))
            .await
        });
        assert_eq!(a.unwrap_err(), "nope");
        assert_eq!(b, 7);
    }

    #[test]
    fn pre_triggered_cancellation_wins_ties() {
        let cancel = Cancellation::new();
        cancel.trigger();

        let outcome = run(async { with_cancellation(async { 5 }, &cancel).await });
        assert_eq!(outcome, None);
    }

    #[test]
    fn inner_completion_wins_when_not_cancelled() {
        let cancel = Cancellation::new();
        let outcome = run(async { with_cancellation(async { 5 }, &cancel).await });
        assert_eq!(outcome, Some(5));
    }

    #[test]
    fn late_trigger_cancels_a_parked_consumer() {
        run(async {
            let queue: Rc<Queue<u32>> = Rc::new(Queue::new());
            let cancel = Rc::new(Cancellation::new());

            let canceller = spawn({
                let cancel = cancel.clone();
                async move {
                    sleep(Duration::from_millis(1)).unwrap().await;
                    cancel.trigger();
                }
            });

            let outcome = with_cancellation(queue.pop(), &cancel).await;
            assert_eq!(outcome, None);
            canceller.await.unwrap();
        });
    }

    #[test]
    fn timeout_then_cancellation_roundtrip() {
        // A consumer times out against an empty queue, then waits under a
        // cancellation that never fires while a producer delivers late.
        let (first, second) = run(async {
            let queue = Rc::new(Queue::new());
            let cancel = Cancellation::new();

            let producer = spawn({
                let queue = queue.clone();
                async move {
                    sleep(Duration::from_millis(1)).unwrap().await;
                    queue.push(10);
                }
            });

            let first = timeout(Duration::from_nanos(1), queue.pop()).unwrap().await;
            let second = with_cancellation(queue.pop(), &cancel).await;
            producer.await.unwrap();
            (first, second)
        });

        assert!(first.is_err());
        assert_eq!(second, Some(10));
    }
}
