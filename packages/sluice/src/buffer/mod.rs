// implementation of the buffering operators.
//
// the architecture layers up as such:
//
//      bounded    queued    pure state machines driving the deque. panicky
//         ^          ^      and minimal; every transition returns an action
//         |          |      naming which suspension handles to resume. the
//         |          |      transient Modifying state is taken while a
//         |          |      container is being moved out of the state enum,
//         |          |      and is never observable because transitions run
//         |          |      to completion under the region's lock.
//         |          |
//      storage -----/       drives a machine under an Arc<Region<..>>,
//         ^                 performing actions after the lock is released.
//         |                 bounded sends may park the producer; queued sends
//         |                 never do.
//         |
//      stream               the public operators. first consumer poll spawns
//                           the drainer task exactly once; the drainer pulls
//                           the upstream into storage and terminates it, and
//                           dropping the consumer stream aborts the drainer
//                           and cascades a downstream cancellation through
//                           the storage.

mod bounded;
mod queued;
mod storage;
mod stream;

pub use self::stream::{Buffered, QueueBuffered, TryBuffered, TryQueueBuffered};

/// outcome delivered to a consumer pull
pub(crate) type Out<T, E> = Result<Option<T>, E>;


/// Overflow policy for a queued buffer.
///
/// The variant names say which element is dropped when the buffer is full:
/// [`DropOldest`](Policy::DropOldest) evicts the head of the queue so the
/// incoming element enters, [`DropNewest`](Policy::DropNewest) discards the
/// incoming element.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Policy {
    /// Buffer without bound; nothing is ever dropped.
    Unbounded,
    /// Keep at most `limit` elements, evicting the oldest buffered element
    /// to make room for a new one. The limit must be non-zero.
    DropOldest(usize),
    /// Keep at most `limit` elements, discarding new elements while full.
    /// The limit must be non-zero.
    DropNewest(usize),
}

impl Policy {
    /// panics on a zero limit; buffering nothing is a programming error
    pub(crate) fn validate(self) -> Self {
        match self {
            Policy::Unbounded => {}
            Policy::DropOldest(limit) | Policy::DropNewest(limit) => {
                assert!(limit > 0, "buffer policy limit must be non-zero");
            }
        }
        self
    }
}
