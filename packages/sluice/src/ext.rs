//! Stream extension trait carrying the operator surface.

use crate::buffer::{Buffered, Policy, QueueBuffered, TryBuffered, TryQueueBuffered};
use crate::split::{self, SplitStream, UnzipFirst, UnzipSecond};
use futures::Stream;


/// Buffering and fan-out operators over any [`Stream`].
///
/// The buffering operators spawn a drainer task on the first poll and
/// therefore must be polled from within a tokio runtime; dropping the
/// returned stream cancels the drainer.
pub trait SluiceStreamExt: Stream {
    /// Decouple this stream from its consumer through a bounded buffer of
    /// `limit` elements; the upstream is pulled by a background task that
    /// suspends whenever the buffer is full.
    ///
    /// Panics if `limit` is zero.
    fn buffer(self, limit: usize) -> Buffered<Self>
    where
        Self: Sized,
    {
        Buffered::new(self, limit)
    }

    /// Decouple this stream from its consumer through a queue governed by an
    /// overflow [`Policy`]; the upstream is never slowed down.
    ///
    /// Panics if the policy carries a zero limit.
    fn buffer_policy(self, policy: Policy) -> QueueBuffered<Self>
    where
        Self: Sized,
    {
        QueueBuffered::new(self, policy)
    }

    /// As [`buffer`](Self::buffer), for a fallible upstream. An upstream
    /// `Err` terminates the buffer: it surfaces once, after the elements
    /// buffered ahead of it, and the stream ends.
    ///
    /// Panics if `limit` is zero.
    fn try_buffer<T, E>(self, limit: usize) -> TryBuffered<Self, T, E>
    where
        Self: Stream<Item = Result<T, E>> + Sized,
    {
        TryBuffered::new(self, limit)
    }

    /// As [`buffer_policy`](Self::buffer_policy), for a fallible upstream.
    /// The terminal failure is not subject to the overflow policy.
    ///
    /// Panics if the policy carries a zero limit.
    fn try_buffer_policy<T, E>(self, policy: Policy) -> TryQueueBuffered<Self, T, E>
    where
        Self: Stream<Item = Result<T, E>> + Sized,
    {
        TryQueueBuffered::new(self, policy)
    }

    /// Fan this stream out to two downstream sides, each observing the whole
    /// element sequence in order. The sides run in lock-step: the upstream
    /// only advances once both sides have consumed the previous element.
    fn split(self) -> (SplitStream<Self>, SplitStream<Self>)
    where
        Self: Sized,
        Self::Item: Clone,
    {
        split::split(self)
    }

    /// Split a stream of pairs into its two projections, built from
    /// [`split`](Self::split) plus a map on each side.
    fn unzip<A, B>(self) -> (UnzipFirst<Self>, UnzipSecond<Self>)
    where
        Self: Stream<Item = (A, B)> + Sized,
        A: Clone,
        B: Clone,
    {
        split::unzip(self)
    }
}

impl<S: Stream> SluiceStreamExt for S {}
