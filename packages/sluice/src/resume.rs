//! One-shot suspension handles.
//!
//! A suspended operation is represented by a pair: the [`Suspended`] future
//! is held by the task that parked, and the [`Resumer`] is stored inside the
//! owning state machine. Resuming consumes the handle, so a handle is resumed
//! at most once at the type level. A handle is never dropped silently: the
//! state machines either resume a handle at the moment it is removed from
//! their state, or hand it out in an action for the caller to resume.

use crate::region::Region;
use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};


/// Shared slot between a `Resumer` and its `Suspended` future.
struct Slot<O> {
    /// outcome delivered by the resumer, not yet observed by the future
    outcome: Option<O>,
    /// waker from the most recent pending poll
    waker: Option<Waker>,
}

/// Create a linked suspension-handle pair.
pub(crate) fn resume_pair<O>() -> (Resumer<O>, Suspended<O>) {
    let slot = Arc::new(Region::new(Slot { outcome: None, waker: None }));
    (Resumer { slot: Some(Arc::clone(&slot)) }, Suspended { slot, done: false })
}

/// Resumption side of a suspension handle.
///
/// Owned by a state machine while the operation is parked. Resuming delivers
/// the outcome and wakes the parked task, if it has polled.
pub(crate) struct Resumer<O> {
    /// taken by `resume`; present means not yet resumed
    slot: Option<Arc<Region<Slot<O>>>>,
}

impl<O> Resumer<O> {
    /// Deliver the outcome and wake the suspended task.
    pub(crate) fn resume(mut self, outcome: O) {
        let slot = self.slot.take().unwrap();
        let waker = slot.with(|slot| {
            slot.outcome = Some(outcome);
            slot.waker.take()
        });
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<O> Drop for Resumer<O> {
    fn drop(&mut self) {
        if self.slot.is_some() && !std::thread::panicking() {
            debug_assert!(false, "suspension handle dropped without resuming");
        }
    }
}

impl<O> Debug for Resumer<O> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Resumer").field("resumed", &self.slot.is_none()).finish()
    }
}

/// Future side of a suspension handle.
///
/// Resolves once the linked [`Resumer`] delivers an outcome. Fully fused:
/// polling after resolution panics rather than yielding a stale value.
pub(crate) struct Suspended<O> {
    slot: Arc<Region<Slot<O>>>,
    done: bool,
}

impl<O> Suspended<O> {
    /// Whether this future has already resolved.
    pub(crate) fn is_resolved(&self) -> bool {
        self.done
    }
}

impl<O> Future for Suspended<O> {
    type Output = O;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<O> {
        let this = self.get_mut();
        assert!(!this.done, "suspension polled after already resolved");
        this.slot.with(|slot| {
            if let Some(outcome) = slot.outcome.take() {
                this.done = true;
                Poll::Ready(outcome)
            } else {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::{waker, ArcWake};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(AtomicBool);

    impl ArcWake for Flag {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.store(true, Ordering::SeqCst);
        }
    }

    fn flag_waker() -> (Arc<Flag>, Waker) {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let waker = waker(Arc::clone(&flag));
        (flag, waker)
    }

    #[test]
    fn resume_before_poll() {
        let (resumer, mut suspended) = resume_pair::<u32>();
        resumer.resume(5);

        let (_, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut suspended).poll(&mut cx), Poll::Ready(5));
        assert!(suspended.is_resolved());
    }

    #[test]
    fn resume_after_poll_wakes() {
        let (resumer, mut suspended) = resume_pair::<&'static str>();

        let (flag, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut suspended).poll(&mut cx), Poll::Pending);
        assert!(!flag.0.load(Ordering::SeqCst));

        resumer.resume("go");
        assert!(flag.0.load(Ordering::SeqCst));
        assert_eq!(Pin::new(&mut suspended).poll(&mut cx), Poll::Ready("go"));
    }

    #[test]
    fn resume_into_dropped_future_is_harmless() {
        let (resumer, suspended) = resume_pair::<u32>();
        drop(suspended);
        resumer.resume(9);
    }

    #[test]
    #[should_panic(expected = "polled after already resolved")]
    fn poll_after_resolved_panics() {
        let (resumer, mut suspended) = resume_pair::<()>();
        resumer.resume(());

        let (_, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut suspended).poll(&mut cx), Poll::Ready(()));
        let _ = Pin::new(&mut suspended).poll(&mut cx);
    }
}
