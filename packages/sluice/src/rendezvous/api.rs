// exposed API of the rendezvous channel.

use super::machine::{Machine, NextAction, SendAction};
use crate::{
    region::Region,
    resume::{resume_pair, Suspended},
};
use futures::Stream;
use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};


/// Unbuffered producer/consumer meeting point.
///
/// Every [`send`](Self::send) suspends until a consumer takes the element (or
/// the channel is finished), which provides back-pressure: the producer runs
/// no faster than the consumer. Handles are cheaply cloneable; producers and
/// consumers on a single channel are each served strictly first-in first-out.
///
/// Dropping an unresolved send future force-finishes the channel (producer
/// cancellation is treated as channel termination); dropping an unresolved
/// next future only unparks that one consumer.
pub struct RendezvousChannel<T>(Arc<Region<Machine<T>>>);

impl<T> RendezvousChannel<T> {
    /// Create a new, open channel.
    pub fn new() -> Self {
        RendezvousChannel(Arc::new(Region::new(Machine::new())))
    }

    /// Offer an element, suspending until a consumer takes it.
    ///
    /// Resolves with no payload: either a consumer received the element, or
    /// the channel terminated and the element was discarded. Sending on an
    /// already-finished channel resolves immediately.
    pub fn send(&self, elem: T) -> SendFut<T> {
        let (resume, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.send(id, elem, resume))
        });
        match action {
            SendAction::Parked => {}
            SendAction::Deliver { consumer, elem, producer } => {
                consumer.resume(Some(elem));
                producer.resume(());
            }
            SendAction::Dropped(producer) => producer.resume(()),
        }
        SendFut { channel: self.clone(), id, suspended }
    }

    /// Take the next element, suspending until a producer delivers one.
    ///
    /// Resolves to `Some(elem)`, or `None` once the channel is finished.
    pub fn next(&self) -> NextFut<T> {
        let (resume, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.next(id, resume))
        });
        match action {
            NextAction::Parked => {}
            NextAction::Receive { consumer, elem, producer } => {
                consumer.resume(Some(elem));
                producer.resume(());
            }
            NextAction::Finished(consumer) => consumer.resume(None),
        }
        NextFut { channel: self.clone(), id, suspended }
    }

    /// Finish the channel.
    ///
    /// Every parked producer resumes with its element discarded and every
    /// parked consumer resumes with `None`. Idempotent; all subsequent sends
    /// resolve immediately and all subsequent nexts yield `None`.
    pub fn finish(&self) {
        self.0.with(|machine| machine.finish()).perform();
    }

    /// Adapt the consumer side into a [`Stream`].
    pub fn stream(&self) -> RendezvousStream<T> {
        RendezvousStream { channel: self.clone(), pending: None }
    }
}

impl<T> Clone for RendezvousChannel<T> {
    fn clone(&self) -> Self {
        RendezvousChannel(Arc::clone(&self.0))
    }
}

impl<T> Default for RendezvousChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for RendezvousChannel<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("RendezvousChannel").finish_non_exhaustive()
    }
}

/// Future for offering an element into a [`RendezvousChannel`].
///
/// If dropped before resolving while the element is still parked, the channel
/// is force-finished and all waiters are released.
pub struct SendFut<T> {
    channel: RendezvousChannel<T>,
    id: u64,
    suspended: Suspended<()>,
}

impl<T> Future for SendFut<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T> Drop for SendFut<T> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            let action = self.channel.0.with(|machine| machine.cancel_send(self.id));
            if let Some(action) = action {
                action.perform();
            }
        }
    }
}

/// Future for taking the next element from a [`RendezvousChannel`].
///
/// If dropped before resolving, the parked consumer is removed and resumed
/// with `None`; the rest of the channel is unaffected.
pub struct NextFut<T> {
    channel: RendezvousChannel<T>,
    id: u64,
    suspended: Suspended<Option<T>>,
}

impl<T> Future for NextFut<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T> Drop for NextFut<T> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            let removed = self.channel.0.with(|machine| machine.cancel_next(self.id));
            if let Some(removed) = removed {
                removed.resume(None);
            }
        }
    }
}

/// [`Stream`] over the consumer side of a [`RendezvousChannel`].
///
/// Yields `None` forever once the channel has finished.
pub struct RendezvousStream<T> {
    channel: RendezvousChannel<T>,
    pending: Option<NextFut<T>>,
}

impl<T> Stream for RendezvousStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        let this = self.get_mut();
        let pending = this.pending.get_or_insert_with(|| this.channel.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn send_then_next_round_trips() {
        let channel = RendezvousChannel::new();
        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send(42).await })
        };
        assert_eq!(channel.next().await, Some(42));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn two_producers_one_consumer_interleaves_fifo_per_producer() {
        let channel = RendezvousChannel::new();
        let mut producers = Vec::new();
        for _ in 0..2 {
            let channel = channel.clone();
            producers.push(tokio::spawn(async move {
                channel.send(7).await;
                channel.send(9).await;
            }));
        }

        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(channel.next().await.unwrap());
        }
        for producer in producers {
            producer.await.unwrap();
        }

        // multiset is {7, 9, 7, 9} and each producer's 7 precedes its 9
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(sorted, vec![7, 7, 9, 9]);
        let first_nine = got.iter().position(|&elem| elem == 9).unwrap();
        assert!(got[..first_nine].contains(&7));
    }

    #[tokio::test]
    async fn finish_is_idempotent_and_terminal() {
        let channel = RendezvousChannel::<u32>::new();
        channel.finish();
        channel.finish();
        assert_eq!(channel.next().await, None);
        // send after finish resolves immediately with the element discarded
        channel.send(1).await;
        assert_eq!(channel.next().await, None);
    }

    #[tokio::test]
    async fn finish_releases_parked_consumer() {
        let channel = RendezvousChannel::<u32>::new();
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.next().await })
        };
        // let the consumer park before finishing
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.finish();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropping_parked_send_force_finishes() {
        let channel = RendezvousChannel::new();
        {
            let send = channel.send(1);
            // never polled to completion; dropping it cancels the producer
            drop(send);
        }
        assert_eq!(channel.next().await, None);
    }

    #[tokio::test]
    async fn dropping_parked_next_leaves_channel_live() {
        let channel = RendezvousChannel::new();
        {
            let mut next = channel.next();
            // park the consumer, then abandon it
            let _ = futures::poll!(&mut next);
            drop(next);
        }
        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send(3).await })
        };
        assert_eq!(channel.next().await, Some(3));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn stream_adapter_drains_in_order() {
        let channel = RendezvousChannel::new();
        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for elem in 0..5 {
                    channel.send(elem).await;
                }
                channel.finish();
            })
        };
        let collected = channel.stream().collect::<Vec<_>>().await;
        assert_eq!(collected, vec![0, 1, 2, 3, 4]);
        producer.await.unwrap();
    }
}
