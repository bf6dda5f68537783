// the public buffering operators: streams that pull from an upstream through
// a bounded buffer driven by a spawned drainer task.

use super::storage::{BoundedNext, BoundedStorage, QueuedNext, QueuedStorage};
use super::Policy;
use crate::util::abort_on_drop::AbortOnDrop;
use futures::{pin_mut, Future, Stream, StreamExt};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};


/// runs a cancellation closure unless disarmed; covers the drainer being
/// aborted at any suspension point
struct CancelGuard<F: FnOnce()> {
    cancel: Option<F>,
}

impl<F: FnOnce()> CancelGuard<F> {
    fn new(cancel: F) -> Self {
        CancelGuard { cancel: Some(cancel) }
    }

    fn disarm(mut self) {
        self.cancel = None;
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

async fn drain_bounded<S: Stream>(upstream: S, storage: BoundedStorage<S::Item, Infallible>) {
    let guard = CancelGuard::new({
        let storage = storage.clone();
        move || {
            trace!("bounded buffer drainer cancelled");
            storage.cancel_up();
        }
    });
    pin_mut!(upstream);
    while let Some(elem) = upstream.next().await {
        storage.send(elem).await;
    }
    trace!("bounded buffer upstream finished");
    guard.disarm();
    storage.finish();
}

async fn drain_try_bounded<S, T, E>(upstream: S, storage: BoundedStorage<T, E>)
where
    S: Stream<Item = Result<T, E>>,
{
    let guard = CancelGuard::new({
        let storage = storage.clone();
        move || {
            trace!("bounded buffer drainer cancelled");
            storage.cancel_up();
        }
    });
    pin_mut!(upstream);
    while let Some(item) = upstream.next().await {
        match item {
            Ok(elem) => storage.send(elem).await,
            Err(error) => {
                trace!("bounded buffer upstream failed");
                guard.disarm();
                storage.fail(error);
                return;
            }
        }
    }
    trace!("bounded buffer upstream finished");
    guard.disarm();
    storage.finish();
}

async fn drain_queued<S: Stream>(upstream: S, storage: QueuedStorage<S::Item, Infallible>) {
    let guard = CancelGuard::new({
        let storage = storage.clone();
        move || {
            trace!("queued buffer drainer cancelled");
            storage.cancel_up();
        }
    });
    pin_mut!(upstream);
    while let Some(elem) = upstream.next().await {
        storage.send(elem);
    }
    trace!("queued buffer upstream finished");
    guard.disarm();
    storage.finish();
}

async fn drain_try_queued<S, T, E>(upstream: S, storage: QueuedStorage<T, E>)
where
    S: Stream<Item = Result<T, E>>,
{
    let guard = CancelGuard::new({
        let storage = storage.clone();
        move || {
            trace!("queued buffer drainer cancelled");
            storage.cancel_up();
        }
    });
    pin_mut!(upstream);
    while let Some(item) = upstream.next().await {
        match item {
            Ok(elem) => storage.send(elem),
            Err(error) => {
                trace!("queued buffer upstream failed");
                guard.disarm();
                storage.fail(error);
                return;
            }
        }
    }
    trace!("queued buffer upstream finished");
    guard.disarm();
    storage.finish();
}


/// Stream returned by [`SluiceStreamExt::buffer`](crate::SluiceStreamExt::buffer).
///
/// Decouples the upstream from the consumer with a bounded buffer: a spawned
/// drainer pulls the upstream and suspends whenever the buffer is full, so
/// the upstream runs at most `limit` elements ahead of the consumer. The
/// drainer is spawned on the first poll and aborted when this stream drops.
pub struct Buffered<S: Stream> {
    storage: BoundedStorage<S::Item, Infallible>,
    upstream: Option<S>,
    task: Option<AbortOnDrop>,
    pending: Option<BoundedNext<S::Item, Infallible>>,
}

impl<S: Stream> Buffered<S> {
    pub(crate) fn new(upstream: S, limit: usize) -> Self {
        Buffered {
            storage: BoundedStorage::new(limit),
            upstream: Some(upstream),
            task: None,
            pending: None,
        }
    }
}

// the upstream is never polled in place, only moved into the spawned task,
// so nothing here is structurally pinned
impl<S: Stream> Unpin for Buffered<S> {}

impl<S> Stream for Buffered<S>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<S::Item>> {
        let this = self.get_mut();
        if this.task.is_none() {
            let upstream = this.upstream.take().unwrap();
            let drainer = drain_bounded(upstream, this.storage.clone());
            this.task = Some(AbortOnDrop::spawn("bounded buffer drainer", drainer));
        }
        let pending = this.pending.get_or_insert_with(|| this.storage.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled.map(|out| match out {
            Ok(item) => item,
            Err(never) => match never {},
        })
    }
}

impl<S: Stream> Drop for Buffered<S> {
    fn drop(&mut self) {
        self.storage.cancel_down();
    }
}

/// Stream returned by [`SluiceStreamExt::try_buffer`](crate::SluiceStreamExt::try_buffer).
///
/// As [`Buffered`], over a fallible upstream: an upstream `Err` terminates
/// the buffer, surfaces once after the buffered elements drain, and ends the
/// stream.
pub struct TryBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    storage: BoundedStorage<T, E>,
    upstream: Option<S>,
    task: Option<AbortOnDrop>,
    pending: Option<BoundedNext<T, E>>,
}

impl<S, T, E> TryBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    pub(crate) fn new(upstream: S, limit: usize) -> Self {
        TryBuffered {
            storage: BoundedStorage::new(limit),
            upstream: Some(upstream),
            task: None,
            pending: None,
        }
    }
}

impl<S, T, E> Unpin for TryBuffered<S, T, E> where S: Stream<Item = Result<T, E>> {}

impl<S, T, E> Stream for TryBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Result<T, E>>> {
        let this = self.get_mut();
        if this.task.is_none() {
            let upstream = this.upstream.take().unwrap();
            let drainer = drain_try_bounded(upstream, this.storage.clone());
            this.task = Some(AbortOnDrop::spawn("bounded buffer drainer", drainer));
        }
        let pending = this.pending.get_or_insert_with(|| this.storage.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled.map(|out| match out {
            Ok(Some(elem)) => Some(Ok(elem)),
            Ok(None) => None,
            Err(error) => Some(Err(error)),
        })
    }
}

impl<S, T, E> Drop for TryBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    fn drop(&mut self) {
        self.storage.cancel_down();
    }
}

/// Stream returned by [`SluiceStreamExt::buffer_policy`](crate::SluiceStreamExt::buffer_policy).
///
/// Decouples the upstream from the consumer with a queue governed by an
/// overflow [`Policy`]; the upstream is never slowed down.
pub struct QueueBuffered<S: Stream> {
    storage: QueuedStorage<S::Item, Infallible>,
    upstream: Option<S>,
    task: Option<AbortOnDrop>,
    pending: Option<QueuedNext<S::Item, Infallible>>,
}

impl<S: Stream> QueueBuffered<S> {
    pub(crate) fn new(upstream: S, policy: Policy) -> Self {
        QueueBuffered {
            storage: QueuedStorage::new(policy),
            upstream: Some(upstream),
            task: None,
            pending: None,
        }
    }
}

impl<S: Stream> Unpin for QueueBuffered<S> {}

impl<S> Stream for QueueBuffered<S>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<S::Item>> {
        let this = self.get_mut();
        if this.task.is_none() {
            let upstream = this.upstream.take().unwrap();
            let drainer = drain_queued(upstream, this.storage.clone());
            this.task = Some(AbortOnDrop::spawn("queued buffer drainer", drainer));
        }
        let pending = this.pending.get_or_insert_with(|| this.storage.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled.map(|out| match out {
            Ok(item) => item,
            Err(never) => match never {},
        })
    }
}

impl<S: Stream> Drop for QueueBuffered<S> {
    fn drop(&mut self) {
        self.storage.cancel_down();
    }
}

/// Stream returned by
/// [`SluiceStreamExt::try_buffer_policy`](crate::SluiceStreamExt::try_buffer_policy).
///
/// As [`QueueBuffered`], over a fallible upstream. The terminal failure is
/// not subject to the overflow policy; it always surfaces after whatever
/// elements survive in the queue.
pub struct TryQueueBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    storage: QueuedStorage<T, E>,
    upstream: Option<S>,
    task: Option<AbortOnDrop>,
    pending: Option<QueuedNext<T, E>>,
}

impl<S, T, E> TryQueueBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    pub(crate) fn new(upstream: S, policy: Policy) -> Self {
        TryQueueBuffered {
            storage: QueuedStorage::new(policy),
            upstream: Some(upstream),
            task: None,
            pending: None,
        }
    }
}

impl<S, T, E> Unpin for TryQueueBuffered<S, T, E> where S: Stream<Item = Result<T, E>> {}

impl<S, T, E> Stream for TryQueueBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Result<T, E>>> {
        let this = self.get_mut();
        if this.task.is_none() {
            let upstream = this.upstream.take().unwrap();
            let drainer = drain_try_queued(upstream, this.storage.clone());
            this.task = Some(AbortOnDrop::spawn("queued buffer drainer", drainer));
        }
        let pending = this.pending.get_or_insert_with(|| this.storage.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled.map(|out| match out {
            Ok(Some(elem)) => Some(Ok(elem)),
            Ok(None) => None,
            Err(error) => Some(Err(error)),
        })
    }
}

impl<S, T, E> Drop for TryQueueBuffered<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    fn drop(&mut self) {
        self.storage.cancel_down();
    }
}
