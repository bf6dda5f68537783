// rendezvous channel state machine. minimal and panicky; the api module wraps
// it defensively.

use crate::resume::Resumer;
use std::{
    collections::{HashSet, VecDeque},
    mem,
};


/// a parked producer: the element it offered plus its resumption handle
struct Producer<T> {
    id: u64,
    elem: T,
    resume: Resumer<()>,
}

/// a parked consumer, keyed by generation id for cancellation
struct Consumer<T> {
    id: u64,
    resume: Resumer<Option<T>>,
}

/// emission shape.
///
/// invariant: exactly one shape is populated; Pending and Awaiting are never
/// simultaneously non-empty, and neither is ever present-but-empty.
enum Emission<T> {
    Idle,
    Pending(VecDeque<Producer<T>>),
    Awaiting(VecDeque<Consumer<T>>),
}

pub(super) struct Machine<T> {
    emission: Emission<T>,
    /// once set, emission is forced to Idle and stays there
    terminal: bool,
    /// wrapping generation counter; ids are unique among live waiters
    next_id: u64,
    /// ids whose cancellation arrived before their waiter was installed
    tombstones: HashSet<u64>,
}

/// deferred work for a send transition
pub(super) enum SendAction<T> {
    /// producer parked in the pending queue
    Parked,
    /// a waiting consumer takes the element; resume the consumer with the
    /// element, then the producer with go
    Deliver {
        consumer: Resumer<Option<T>>,
        elem: T,
        producer: Resumer<()>,
    },
    /// channel is terminal: the element is discarded and the producer
    /// resumes immediately
    Dropped(Resumer<()>),
}

/// deferred work for a next transition
pub(super) enum NextAction<T> {
    /// consumer parked in the awaiting queue
    Parked,
    /// a pending producer hands its element through
    Receive {
        consumer: Resumer<Option<T>>,
        elem: T,
        producer: Resumer<()>,
    },
    /// terminal, tombstoned, or id collision: resolve with None directly
    Finished(Resumer<Option<T>>),
}

/// deferred resumptions for a termination
#[must_use]
pub(super) struct FinishAction<T> {
    producers: Vec<Resumer<()>>,
    consumers: Vec<Resumer<Option<T>>>,
}

impl<T> FinishAction<T> {
    /// resume every released waiter. must be called with no locks held.
    pub(super) fn perform(self) {
        for producer in self.producers {
            producer.resume(());
        }
        for consumer in self.consumers {
            consumer.resume(None);
        }
    }
}

impl<T> Machine<T> {
    pub(super) fn new() -> Self {
        Machine {
            emission: Emission::Idle,
            terminal: false,
            next_id: 0,
            tombstones: HashSet::new(),
        }
    }

    /// mint a generation id for a new operation
    pub(super) fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(super) fn send(&mut self, id: u64, elem: T, resume: Resumer<()>) -> SendAction<T> {
        if self.terminal {
            return SendAction::Dropped(resume);
        }
        match &mut self.emission {
            Emission::Idle => {
                let mut pending = VecDeque::new();
                pending.push_back(Producer { id, elem, resume });
                self.emission = Emission::Pending(pending);
                SendAction::Parked
            }
            Emission::Pending(pending) => {
                pending.push_back(Producer { id, elem, resume });
                SendAction::Parked
            }
            Emission::Awaiting(awaiting) => {
                let consumer = awaiting.pop_front().unwrap();
                if awaiting.is_empty() {
                    self.emission = Emission::Idle;
                }
                SendAction::Deliver { consumer: consumer.resume, elem, producer: resume }
            }
        }
    }

    pub(super) fn next(&mut self, id: u64, resume: Resumer<Option<T>>) -> NextAction<T> {
        if self.tombstones.remove(&id) {
            // cancellation won the race against this suspension
            return NextAction::Finished(resume);
        }
        if self.terminal {
            return NextAction::Finished(resume);
        }
        match &mut self.emission {
            Emission::Idle => {
                let mut awaiting = VecDeque::new();
                awaiting.push_back(Consumer { id, resume });
                self.emission = Emission::Awaiting(awaiting);
                NextAction::Parked
            }
            Emission::Pending(pending) => {
                let producer = pending.pop_front().unwrap();
                if pending.is_empty() {
                    self.emission = Emission::Idle;
                }
                NextAction::Receive {
                    consumer: resume,
                    elem: producer.elem,
                    producer: producer.resume,
                }
            }
            Emission::Awaiting(awaiting) => {
                if awaiting.iter().any(|consumer| consumer.id == id) {
                    // an entry with our id already exists: treat the caller
                    // as cancelled
                    return NextAction::Finished(resume);
                }
                awaiting.push_back(Consumer { id, resume });
                NextAction::Parked
            }
        }
    }

    /// transition to terminal, releasing every parked waiter. idempotent.
    pub(super) fn finish(&mut self) -> FinishAction<T> {
        self.terminal = true;
        self.tombstones.clear();
        let mut action = FinishAction { producers: Vec::new(), consumers: Vec::new() };
        match mem::replace(&mut self.emission, Emission::Idle) {
            Emission::Idle => {}
            Emission::Pending(pending) => {
                // parked elements are discarded
                action.producers = pending.into_iter().map(|producer| producer.resume).collect();
            }
            Emission::Awaiting(awaiting) => {
                action.consumers = awaiting.into_iter().map(|consumer| consumer.resume).collect();
            }
        }
        action
    }

    /// consumer-side cancellation by generation id.
    ///
    /// returns the removed handle (to be resumed with None outside the lock)
    /// if the waiter was still parked. cancelling against Idle records a
    /// tombstone so a racing suspension with the same id resolves to None.
    pub(super) fn cancel_next(&mut self, id: u64) -> Option<Resumer<Option<T>>> {
        if self.terminal {
            return None;
        }
        match &mut self.emission {
            Emission::Awaiting(awaiting) => {
                let pos = awaiting.iter().position(|consumer| consumer.id == id)?;
                let consumer = awaiting.remove(pos).unwrap();
                if awaiting.is_empty() {
                    self.emission = Emission::Idle;
                }
                Some(consumer.resume)
            }
            Emission::Idle => {
                self.tombstones.insert(id);
                None
            }
            // the operation was already resumed; losing the race is a no-op
            Emission::Pending(_) => None,
        }
    }

    /// producer-side cancellation by generation id.
    ///
    /// a producer cancelled while still enqueued force-finishes the channel;
    /// a producer that was already matched is a no-op.
    pub(super) fn cancel_send(&mut self, id: u64) -> Option<FinishAction<T>> {
        if self.terminal {
            return None;
        }
        let enqueued = matches!(
            &self.emission,
            Emission::Pending(pending) if pending.iter().any(|producer| producer.id == id)
        );
        enqueued.then(|| self.finish())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::{resume_pair, Suspended};
    use futures::task::noop_waker;
    use futures::Future;
    use std::task::{Context, Poll};

    fn poll_now<O>(suspended: &mut Suspended<O>) -> Poll<O> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        std::pin::Pin::new(suspended).poll(&mut cx)
    }

    fn perform_send<T>(action: SendAction<T>) {
        match action {
            SendAction::Parked => {}
            SendAction::Deliver { consumer, elem, producer } => {
                consumer.resume(Some(elem));
                producer.resume(());
            }
            SendAction::Dropped(producer) => producer.resume(()),
        }
    }

    fn perform_next<T>(action: NextAction<T>) {
        match action {
            NextAction::Parked => {}
            NextAction::Receive { consumer, elem, producer } => {
                consumer.resume(Some(elem));
                producer.resume(());
            }
            NextAction::Finished(consumer) => consumer.resume(None),
        }
    }

    #[test]
    fn send_then_next_hands_off() {
        let mut machine = Machine::new();

        let (produce, mut sent) = resume_pair();
        let send_id = machine.fresh_id();
        perform_send(machine.send(send_id, 7, produce));
        assert_eq!(poll_now(&mut sent), Poll::Pending);

        let (consume, mut received) = resume_pair();
        let next_id = machine.fresh_id();
        perform_next(machine.next(next_id, consume));
        assert_eq!(poll_now(&mut received), Poll::Ready(Some(7)));
        assert_eq!(poll_now(&mut sent), Poll::Ready(()));
    }

    #[test]
    fn next_then_send_hands_off() {
        let mut machine = Machine::new();

        let (consume, mut received) = resume_pair();
        let next_id = machine.fresh_id();
        perform_next(machine.next(next_id, consume));
        assert_eq!(poll_now(&mut received), Poll::Pending);

        let (produce, mut sent) = resume_pair();
        let send_id = machine.fresh_id();
        perform_send(machine.send(send_id, 9, produce));
        assert_eq!(poll_now(&mut received), Poll::Ready(Some(9)));
        assert_eq!(poll_now(&mut sent), Poll::Ready(()));
    }

    #[test]
    fn waiters_are_fifo_on_both_sides() {
        let mut machine = Machine::new();

        // two parked producers, popped in offer order
        let mut sends = Vec::new();
        for elem in [1, 2] {
            let (produce, sent) = resume_pair();
            let id = machine.fresh_id();
            perform_send(machine.send(id, elem, produce));
            sends.push(sent);
        }
        for expected in [1, 2] {
            let (consume, mut received) = resume_pair();
            let id = machine.fresh_id();
            perform_next(machine.next(id, consume));
            assert_eq!(poll_now(&mut received), Poll::Ready(Some(expected)));
        }
        for mut sent in sends {
            assert_eq!(poll_now(&mut sent), Poll::Ready(()));
        }

        // two parked consumers, served in arrival order
        let mut receives = Vec::new();
        for _ in 0..2 {
            let (consume, received) = resume_pair();
            let id = machine.fresh_id();
            perform_next(machine.next(id, consume));
            receives.push(received);
        }
        for elem in [10, 20] {
            let (produce, mut sent) = resume_pair();
            let id = machine.fresh_id();
            perform_send(machine.send(id, elem, produce));
            assert_eq!(poll_now(&mut sent), Poll::Ready(()));
        }
        assert_eq!(poll_now(&mut receives[0]), Poll::Ready(Some(10)));
        assert_eq!(poll_now(&mut receives[1]), Poll::Ready(Some(20)));
    }

    #[test]
    fn finish_releases_all_waiters_and_is_idempotent() {
        let mut machine = Machine::new();

        let (produce, mut sent) = resume_pair();
        let id = machine.fresh_id();
        perform_send(machine.send(id, 1, produce));

        machine.finish().perform();
        assert_eq!(poll_now(&mut sent), Poll::Ready(()));

        // second finish releases nothing and does not panic
        machine.finish().perform();

        // terminal channel: send resolves immediately, next yields None
        let (produce, mut sent) = resume_pair();
        let id = machine.fresh_id();
        perform_send(machine.send(id, 2, produce));
        assert_eq!(poll_now(&mut sent), Poll::Ready(()));

        let (consume, mut received) = resume_pair();
        let id = machine.fresh_id();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut received), Poll::Ready(None::<u32>));
    }

    #[test]
    fn cancel_next_unparks_the_waiter() {
        let mut machine = Machine::new();

        let (consume, mut received) = resume_pair::<Option<u32>>();
        let id = machine.fresh_id();
        perform_next(machine.next(id, consume));

        let removed = machine.cancel_next(id).unwrap();
        removed.resume(None);
        assert_eq!(poll_now(&mut received), Poll::Ready(None));

        // emission returned to Idle: a fresh send parks rather than delivering
        let (produce, mut sent) = resume_pair();
        let id = machine.fresh_id();
        perform_send(machine.send(id, 5, produce));
        assert_eq!(poll_now(&mut sent), Poll::Pending);
        machine.finish().perform();
    }

    #[test]
    fn cancel_against_idle_tombstones_the_id() {
        let mut machine = Machine::<u32>::new();

        let id = machine.fresh_id();
        assert!(machine.cancel_next(id).is_none());

        // the racing suspension observes the tombstone and resolves to None
        let (consume, mut received) = resume_pair();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut received), Poll::Ready(None));

        // the tombstone is consumed: the same id parks normally afterwards
        let (consume, mut received) = resume_pair();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut received), Poll::Pending);
        machine.finish().perform();
        assert_eq!(poll_now(&mut received), Poll::Ready(None));
    }

    #[test]
    fn id_collision_is_treated_as_cancelled() {
        let mut machine = Machine::<u32>::new();

        let id = machine.fresh_id();
        let (consume, mut first) = resume_pair();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut first), Poll::Pending);

        let (consume, mut second) = resume_pair();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut second), Poll::Ready(None));

        machine.finish().perform();
        assert_eq!(poll_now(&mut first), Poll::Ready(None));
    }

    #[test]
    fn cancel_send_force_finishes() {
        let mut machine = Machine::new();

        let (produce, mut cancelled_sent) = resume_pair();
        let cancelled_id = machine.fresh_id();
        perform_send(machine.send(cancelled_id, 1, produce));

        let (produce, mut other_sent) = resume_pair();
        let other_id = machine.fresh_id();
        perform_send(machine.send(other_id, 2, produce));

        machine.cancel_send(cancelled_id).unwrap().perform();
        assert_eq!(poll_now(&mut cancelled_sent), Poll::Ready(()));
        assert_eq!(poll_now(&mut other_sent), Poll::Ready(()));

        // channel is now terminal
        let (consume, mut received) = resume_pair();
        let id = machine.fresh_id();
        perform_next(machine.next(id, consume));
        assert_eq!(poll_now(&mut received), Poll::Ready(None::<u32>));
    }

    #[test]
    fn cancel_send_after_delivery_is_a_noop() {
        let mut machine = Machine::new();

        let (produce, mut sent) = resume_pair();
        let send_id = machine.fresh_id();
        perform_send(machine.send(send_id, 3, produce));

        let (consume, mut received) = resume_pair();
        let next_id = machine.fresh_id();
        perform_next(machine.next(next_id, consume));
        assert_eq!(poll_now(&mut received), Poll::Ready(Some(3)));
        assert_eq!(poll_now(&mut sent), Poll::Ready(()));

        assert!(machine.cancel_send(send_id).is_none());

        // the channel is still live
        let (produce, mut sent) = resume_pair();
        let id = machine.fresh_id();
        perform_send(machine.send(id, 4, produce));
        assert_eq!(poll_now(&mut sent), Poll::Pending);
        machine.finish().perform();
    }
}
