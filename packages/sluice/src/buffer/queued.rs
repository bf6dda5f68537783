// bounded buffer state machine, queued variant: the producer never suspends,
// overflow is resolved by policy. minimal and panicky; the storage module
// wraps it.

use super::{Out, Policy};
use crate::resume::Resumer;
use std::{collections::VecDeque, mem};


/// buffer state. same shape as the suspending variant, minus the parked
/// producer: overflow never parks, it drops. the parked consumer carries the
/// generation id of its pull so a cancellation that lost the race against a
/// resume finds no matching id and is a no-op.
enum State<T, E> {
    Idle,
    Buffering(VecDeque<T>),
    WaitingForUpstream {
        id: u64,
        consumer: Resumer<Out<T, E>>,
    },
    Finished {
        queue: VecDeque<T>,
        error: Option<E>,
    },
    /// re-entry guard while a container is moved out of the enum
    Modifying,
}

pub(super) struct Machine<T, E> {
    state: State<T, E>,
    policy: Policy,
    /// wrapping generation counter; ids are unique among live operations
    next_id: u64,
}

/// deferred work for a producer offer
pub(super) enum SendAction<T, E> {
    /// buffered, dropped by policy, or discarded after termination
    None,
    /// a parked consumer takes the element directly
    Deliver(Resumer<Out<T, E>>, T),
}

/// deferred work for a consumer pull
pub(super) enum NextAction<T, E> {
    Parked,
    Resolve(Resumer<Out<T, E>>, Out<T, E>),
}

/// deferred work for a terminal transition
#[must_use]
pub(super) enum TerminalAction<T, E> {
    None,
    ResumeConsumer(Resumer<Out<T, E>>, Out<T, E>),
}

impl<T, E> Machine<T, E> {
    pub(super) fn new(policy: Policy) -> Self {
        Machine { state: State::Idle, policy: policy.validate(), next_id: 0 }
    }

    /// mint a generation id for a new pull
    pub(super) fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(super) fn new_elem(&mut self, elem: T) -> SendAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle => {
                let mut queue = VecDeque::new();
                queue.push_back(elem);
                self.state = State::Buffering(queue);
                SendAction::None
            }
            State::Buffering(mut queue) => {
                match self.policy {
                    Policy::Unbounded => queue.push_back(elem),
                    Policy::DropOldest(limit) => {
                        if queue.len() == limit {
                            queue.pop_front();
                        }
                        queue.push_back(elem);
                    }
                    Policy::DropNewest(limit) => {
                        if queue.len() < limit {
                            queue.push_back(elem);
                        }
                    }
                }
                self.state = State::Buffering(queue);
                SendAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Idle;
                SendAction::Deliver(consumer, elem)
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                SendAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    pub(super) fn new_iter(&mut self, id: u64, consumer: Resumer<Out<T, E>>) -> NextAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle => {
                self.state = State::WaitingForUpstream { id, consumer };
                NextAction::Parked
            }
            State::Buffering(mut queue) => {
                let head = queue.pop_front().unwrap();
                self.state = if queue.is_empty() { State::Idle } else { State::Buffering(queue) };
                NextAction::Resolve(consumer, Ok(Some(head)))
            }
            State::WaitingForUpstream { .. } => {
                panic!("second consumer parked on a single-consumer buffer")
            }
            State::Finished { mut queue, mut error } => {
                let action = if let Some(head) = queue.pop_front() {
                    NextAction::Resolve(consumer, Ok(Some(head)))
                } else if let Some(error) = error.take() {
                    NextAction::Resolve(consumer, Err(error))
                } else {
                    NextAction::Resolve(consumer, Ok(None))
                };
                self.state = State::Finished { queue, error };
                action
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    pub(super) fn finish(&mut self) -> TerminalAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::None
            }
            State::Buffering(queue) => {
                self.state = State::Finished { queue, error: None };
                TerminalAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeConsumer(consumer, Ok(None))
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    pub(super) fn fail(&mut self, error: E) -> TerminalAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle => {
                self.state = State::Finished { queue: VecDeque::new(), error: Some(error) };
                TerminalAction::None
            }
            State::Buffering(queue) => {
                self.state = State::Finished { queue, error: Some(error) };
                TerminalAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeConsumer(consumer, Err(error))
            }
            finished @ State::Finished { .. } => {
                // first terminal event wins
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    /// upstream cancelled: finish and drop everything buffered
    pub(super) fn cancel_up(&mut self) -> TerminalAction<T, E> {
        self.cancel()
    }

    /// downstream cancelled: finish and drop everything buffered
    pub(super) fn cancel_down(&mut self) -> TerminalAction<T, E> {
        self.cancel()
    }

    /// keyed consumer cancellation: acts only if the pull parked under this
    /// id is still parked; a cancel that lost the race against a resume
    /// finds no matching id and is a no-op.
    pub(super) fn cancel_next(&mut self, id: u64) -> TerminalAction<T, E> {
        let parked = matches!(
            &self.state,
            State::WaitingForUpstream { id: parked, .. } if *parked == id
        );
        if parked {
            self.cancel_down()
        } else {
            TerminalAction::None
        }
    }

    fn cancel(&mut self) -> TerminalAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle | State::Buffering(_) => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeConsumer(consumer, Ok(None))
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::{resume_pair, Suspended};
    use futures::task::noop_waker;
    use futures::Future;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::task::{Context, Poll};

    type TestOut = Out<u32, &'static str>;

    fn new_rng() -> impl Rng {
        Pcg32::from_seed(0xfeedfacefeedfacefeedfacefeedfaceu128.to_le_bytes())
    }

    fn poll_now<O>(suspended: &mut Suspended<O>) -> Poll<O> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        std::pin::Pin::new(suspended).poll(&mut cx)
    }

    fn offer(machine: &mut Machine<u32, &'static str>, elem: u32) {
        match machine.new_elem(elem) {
            SendAction::None => {}
            SendAction::Deliver(consumer, elem) => consumer.resume(Ok(Some(elem))),
        }
    }

    fn pull(machine: &mut Machine<u32, &'static str>) -> Suspended<TestOut> {
        let (consumer, received) = resume_pair();
        let id = machine.fresh_id();
        match machine.new_iter(id, consumer) {
            NextAction::Parked => {}
            NextAction::Resolve(consumer, out) => consumer.resume(out),
        }
        received
    }

    fn perform_terminal(action: TerminalAction<u32, &'static str>) {
        match action {
            TerminalAction::None => {}
            TerminalAction::ResumeConsumer(consumer, out) => consumer.resume(out),
        }
    }

    fn drain(machine: &mut Machine<u32, &'static str>) -> Vec<u32> {
        let mut drained = Vec::new();
        loop {
            match poll_now(&mut pull(machine)) {
                Poll::Ready(Ok(Some(elem))) => drained.push(elem),
                Poll::Ready(Ok(None)) => return drained,
                Poll::Ready(Err(error)) => panic!("unexpected failure: {}", error),
                Poll::Pending => panic!("drain parked"),
            }
        }
    }

    #[test]
    fn drop_oldest_evicts_the_head() {
        let mut machine = Machine::new(Policy::DropOldest(2));
        for elem in 1..=5 {
            offer(&mut machine, elem);
        }
        perform_terminal(machine.finish());
        assert_eq!(drain(&mut machine), vec![4, 5]);
    }

    #[test]
    fn drop_newest_discards_the_incoming() {
        let mut machine = Machine::new(Policy::DropNewest(2));
        for elem in 1..=5 {
            offer(&mut machine, elem);
        }
        perform_terminal(machine.finish());
        assert_eq!(drain(&mut machine), vec![1, 2]);
    }

    #[test]
    fn unbounded_never_drops() {
        let mut machine = Machine::new(Policy::Unbounded);
        for elem in 0..100 {
            offer(&mut machine, elem);
        }
        perform_terminal(machine.finish());
        assert_eq!(drain(&mut machine), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn parked_consumer_takes_the_element_directly() {
        let mut machine = Machine::new(Policy::DropOldest(1));
        let mut received = pull(&mut machine);
        assert_eq!(poll_now(&mut received), Poll::Pending);
        offer(&mut machine, 3);
        assert_eq!(poll_now(&mut received), Poll::Ready(Ok(Some(3))));
    }

    #[test]
    fn failure_surfaces_after_buffered_elements() {
        let mut machine = Machine::new(Policy::Unbounded);
        offer(&mut machine, 1);
        perform_terminal(machine.fail("boom"));
        perform_terminal(machine.fail("later"));
        assert_eq!(poll_now(&mut pull(&mut machine)), Poll::Ready(Ok(Some(1))));
        assert_eq!(poll_now(&mut pull(&mut machine)), Poll::Ready(Err("boom")));
        assert_eq!(poll_now(&mut pull(&mut machine)), Poll::Ready(Ok(None)));
    }

    #[test]
    fn cancel_discards_and_releases() {
        let mut machine = Machine::<u32, &'static str>::new(Policy::Unbounded);
        offer(&mut machine, 1);
        perform_terminal(machine.cancel_down());
        assert_eq!(poll_now(&mut pull(&mut machine)), Poll::Ready(Ok(None)));
    }

    #[test]
    fn keyed_cancel_matches_only_the_parked_pull() {
        let mut machine = Machine::<u32, &'static str>::new(Policy::Unbounded);
        let (consumer, mut received) = resume_pair();
        let id = machine.fresh_id();
        match machine.new_iter(id, consumer) {
            NextAction::Parked => {}
            NextAction::Resolve(consumer, out) => consumer.resume(out),
        }
        assert_eq!(poll_now(&mut received), Poll::Pending);

        // a stale id leaves the pull parked
        perform_terminal(machine.cancel_next(id.wrapping_add(1)));
        assert_eq!(poll_now(&mut received), Poll::Pending);

        // the pull's own id releases it with None
        perform_terminal(machine.cancel_next(id));
        assert_eq!(poll_now(&mut received), Poll::Ready(Ok(None)));
    }

    #[test]
    #[should_panic(expected = "limit must be non-zero")]
    fn zero_limit_is_a_programming_error() {
        Machine::<u32, &'static str>::new(Policy::DropOldest(0));
    }

    // model equivalence: a policy buffer behaves like the obvious VecDeque
    // program over any interleaving of offers and pulls
    fn policy_model_test(policy: Policy) {
        let mut rng = new_rng();
        for _ in 0..200 {
            let mut machine = Machine::<u32, &'static str>::new(policy);
            let mut model = VecDequeModel::new(policy);
            for elem in 0u32..300 {
                // pulling an empty buffer would park; offer instead
                if rng.gen_ratio(60, 100) || model.queue.is_empty() {
                    offer(&mut machine, elem);
                    model.offer(elem);
                } else {
                    match poll_now(&mut pull(&mut machine)) {
                        Poll::Ready(Ok(Some(got))) => assert_eq!(Some(got), model.pull()),
                        other => panic!("unexpected pull result: {:?}", other),
                    }
                }
            }
            perform_terminal(machine.finish());
            let mut rest = Vec::new();
            while let Some(elem) = model.pull() {
                rest.push(elem);
            }
            assert_eq!(drain(&mut machine), rest);
        }
    }

    struct VecDequeModel {
        queue: std::collections::VecDeque<u32>,
        policy: Policy,
    }

    impl VecDequeModel {
        fn new(policy: Policy) -> Self {
            VecDequeModel { queue: std::collections::VecDeque::new(), policy }
        }

        fn offer(&mut self, elem: u32) {
            match self.policy {
                Policy::Unbounded => self.queue.push_back(elem),
                Policy::DropOldest(limit) => {
                    if self.queue.len() == limit {
                        self.queue.pop_front();
                    }
                    self.queue.push_back(elem);
                }
                Policy::DropNewest(limit) => {
                    if self.queue.len() < limit {
                        self.queue.push_back(elem);
                    }
                }
            }
        }

        fn pull(&mut self) -> Option<u32> {
            self.queue.pop_front()
        }
    }

    #[test]
    fn model_equivalence_unbounded() {
        policy_model_test(Policy::Unbounded);
    }

    #[test]
    fn model_equivalence_drop_oldest() {
        policy_model_test(Policy::DropOldest(7));
    }

    #[test]
    fn model_equivalence_drop_newest() {
        policy_model_test(Policy::DropNewest(7));
    }
}
