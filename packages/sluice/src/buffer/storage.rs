// storage wrappers: drive the buffer state machines under a shared region,
// performing the returned actions after the lock is released.

use super::{bounded, queued, Out, Policy};
use crate::{
    region::Region,
    resume::{resume_pair, Suspended},
};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};


/// handle to a suspending bounded buffer
pub(super) struct BoundedStorage<T, E>(Arc<Region<bounded::Machine<T, E>>>);

impl<T, E> BoundedStorage<T, E> {
    pub(super) fn new(limit: usize) -> Self {
        BoundedStorage(Arc::new(Region::new(bounded::Machine::new(limit))))
    }

    /// Offer an element; the returned future parks while the buffer is full.
    pub(super) fn send(&self, elem: T) -> SendFut<T, E> {
        let (producer, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.new_elem(id, producer, elem))
        });
        match action {
            bounded::SendAction::Resume(producer) => producer.resume(()),
            bounded::SendAction::Parked => {}
            bounded::SendAction::Deliver { consumer, elem, producer } => {
                consumer.resume(Ok(Some(elem)));
                producer.resume(());
            }
        }
        SendFut { storage: self.clone(), id, suspended }
    }

    /// Pull the next element; the returned future parks while the buffer is
    /// empty and unterminated.
    pub(super) fn next(&self) -> BoundedNext<T, E> {
        let (consumer, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.new_iter(id, consumer))
        });
        match action {
            bounded::NextAction::Parked => {}
            bounded::NextAction::Resolve(consumer, out) => consumer.resume(out),
            bounded::NextAction::ResolveAndUnpark { consumer, elem, producer } => {
                consumer.resume(Ok(Some(elem)));
                producer.resume(());
            }
        }
        BoundedNext { storage: self.clone(), id, suspended }
    }

    pub(super) fn finish(&self) {
        perform_bounded_terminal(self.0.with(|machine| machine.finish()));
    }

    pub(super) fn fail(&self, error: E) {
        perform_bounded_terminal(self.0.with(|machine| machine.fail(error)));
    }

    pub(super) fn cancel_up(&self) {
        perform_bounded_terminal(self.0.with(|machine| machine.cancel_up()));
    }

    pub(super) fn cancel_down(&self) {
        perform_bounded_terminal(self.0.with(|machine| machine.cancel_down()));
    }

    fn cancel_send(&self, id: u64) {
        perform_bounded_terminal(self.0.with(|machine| machine.cancel_send(id)));
    }

    fn cancel_next(&self, id: u64) {
        perform_bounded_terminal(self.0.with(|machine| machine.cancel_next(id)));
    }
}

impl<T, E> Clone for BoundedStorage<T, E> {
    fn clone(&self) -> Self {
        BoundedStorage(Arc::clone(&self.0))
    }
}

fn perform_bounded_terminal<T, E>(action: bounded::TerminalAction<T, E>) {
    match action {
        bounded::TerminalAction::None => {}
        bounded::TerminalAction::ResumeConsumer(consumer, out) => consumer.resume(out),
        bounded::TerminalAction::ResumeProducer(producer) => producer.resume(()),
    }
}

/// handle to a queued buffer; offers never suspend
pub(super) struct QueuedStorage<T, E>(Arc<Region<queued::Machine<T, E>>>);

impl<T, E> QueuedStorage<T, E> {
    pub(super) fn new(policy: Policy) -> Self {
        QueuedStorage(Arc::new(Region::new(queued::Machine::new(policy))))
    }

    pub(super) fn send(&self, elem: T) {
        match self.0.with(|machine| machine.new_elem(elem)) {
            queued::SendAction::None => {}
            queued::SendAction::Deliver(consumer, elem) => consumer.resume(Ok(Some(elem))),
        }
    }

    pub(super) fn next(&self) -> QueuedNext<T, E> {
        let (consumer, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.new_iter(id, consumer))
        });
        match action {
            queued::NextAction::Parked => {}
            queued::NextAction::Resolve(consumer, out) => consumer.resume(out),
        }
        QueuedNext { storage: self.clone(), id, suspended }
    }

    pub(super) fn finish(&self) {
        perform_queued_terminal(self.0.with(|machine| machine.finish()));
    }

    pub(super) fn fail(&self, error: E) {
        perform_queued_terminal(self.0.with(|machine| machine.fail(error)));
    }

    pub(super) fn cancel_up(&self) {
        perform_queued_terminal(self.0.with(|machine| machine.cancel_up()));
    }

    pub(super) fn cancel_down(&self) {
        perform_queued_terminal(self.0.with(|machine| machine.cancel_down()));
    }

    fn cancel_next(&self, id: u64) {
        perform_queued_terminal(self.0.with(|machine| machine.cancel_next(id)));
    }
}

impl<T, E> Clone for QueuedStorage<T, E> {
    fn clone(&self) -> Self {
        QueuedStorage(Arc::clone(&self.0))
    }
}

fn perform_queued_terminal<T, E>(action: queued::TerminalAction<T, E>) {
    match action {
        queued::TerminalAction::None => {}
        queued::TerminalAction::ResumeConsumer(consumer, out) => consumer.resume(out),
    }
}

/// Future for offering into a bounded buffer.
///
/// Dropping it unresolved counts as upstream cancellation; the cancel is
/// keyed by the offer's generation id, so a drop that raced a resume is a
/// no-op.
pub(super) struct SendFut<T, E> {
    storage: BoundedStorage<T, E>,
    id: u64,
    suspended: Suspended<()>,
}

impl<T, E> Future for SendFut<T, E> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T, E> Drop for SendFut<T, E> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            self.storage.cancel_send(self.id);
        }
    }
}

/// Future for pulling from a bounded buffer.
///
/// Dropping it unresolved counts as downstream cancellation, keyed by the
/// pull's generation id as above.
pub(super) struct BoundedNext<T, E> {
    storage: BoundedStorage<T, E>,
    id: u64,
    suspended: Suspended<Out<T, E>>,
}

impl<T, E> Future for BoundedNext<T, E> {
    type Output = Out<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Out<T, E>> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T, E> Drop for BoundedNext<T, E> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            self.storage.cancel_next(self.id);
        }
    }
}

/// Future for pulling from a queued buffer.
///
/// Dropping it unresolved counts as downstream cancellation, keyed by the
/// pull's generation id as above.
pub(super) struct QueuedNext<T, E> {
    storage: QueuedStorage<T, E>,
    id: u64,
    suspended: Suspended<Out<T, E>>,
}

impl<T, E> Future for QueuedNext<T, E> {
    type Output = Out<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Out<T, E>> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T, E> Drop for QueuedNext<T, E> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            self.storage.cancel_next(self.id);
        }
    }
}
