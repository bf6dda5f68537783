// bounded buffer state machine, suspending variant: the producer parks when
// the buffer is full. minimal and panicky; the storage module wraps it.

use super::Out;
use crate::resume::Resumer;
use std::{collections::VecDeque, mem};


/// buffer state.
///
/// invariants: in Buffering the deque holds between 1 and `limit` elements;
/// in WaitingForDownstream it holds exactly `limit` (the overflow element is
/// parked beside the producer); there is never more than one parked waiter
/// per side. parked waiters carry the generation id of their operation so a
/// cancellation that lost the race against a resume finds no matching id and
/// is a no-op.
enum State<T, E> {
    Idle,
    Buffering(VecDeque<T>),
    /// buffer full: the producer is parked together with the element that
    /// did not fit
    WaitingForDownstream {
        id: u64,
        producer: Resumer<()>,
        elem: T,
        queue: VecDeque<T>,
    },
    /// buffer empty: the consumer is parked
    WaitingForUpstream {
        id: u64,
        consumer: Resumer<Out<T, E>>,
    },
    /// terminal for the producer; the consumer still drains the deque, then
    /// the error if any, then None
    Finished {
        queue: VecDeque<T>,
        error: Option<E>,
    },
    /// re-entry guard while a container is moved out of the enum
    Modifying,
}

pub(super) struct Machine<T, E> {
    state: State<T, E>,
    limit: usize,
    /// wrapping generation counter; ids are unique among live operations
    next_id: u64,
}

/// deferred work for a producer offer
pub(super) enum SendAction<T, E> {
    /// element buffered or discarded; resume the producer immediately
    Resume(Resumer<()>),
    /// buffer full; the producer stays parked
    Parked,
    /// a parked consumer takes the element directly
    Deliver {
        consumer: Resumer<Out<T, E>>,
        elem: T,
        producer: Resumer<()>,
    },
}

/// deferred work for a consumer pull
pub(super) enum NextAction<T, E> {
    Parked,
    Resolve(Resumer<Out<T, E>>, Out<T, E>),
    /// head element handed out and the parked producer's element admitted
    ResolveAndUnpark {
        consumer: Resumer<Out<T, E>>,
        elem: T,
        producer: Resumer<()>,
    },
}

/// deferred work for a terminal transition
#[must_use]
pub(super) enum TerminalAction<T, E> {
    None,
    ResumeConsumer(Resumer<Out<T, E>>, Out<T, E>),
    ResumeProducer(Resumer<()>),
}

impl<T, E> Machine<T, E> {
    pub(super) fn new(limit: usize) -> Self {
        assert!(limit > 0, "buffer limit must be non-zero");
        Machine { state: State::Idle, limit, next_id: 0 }
    }

    /// mint a generation id for a new operation
    pub(super) fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(super) fn new_elem(&mut self, id: u64, producer: Resumer<()>, elem: T) -> SendAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle => {
                let mut queue = VecDeque::new();
                queue.push_back(elem);
                self.state = State::Buffering(queue);
                SendAction::Resume(producer)
            }
            State::Buffering(mut queue) => {
                if queue.len() < self.limit {
                    queue.push_back(elem);
                    self.state = State::Buffering(queue);
                    SendAction::Resume(producer)
                } else {
                    self.state = State::WaitingForDownstream { id, producer, elem, queue };
                    SendAction::Parked
                }
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Idle;
                SendAction::Deliver { consumer, elem, producer }
            }
            State::WaitingForDownstream { .. } => {
                panic!("element offered while a producer is already parked")
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                SendAction::Resume(producer)
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
            State::WaitingForDownstream { producer, elem, mut queue, .. } => {
                let head = queue.pop_front().unwrap();
                queue.push_back(elem);
                self.state = State::Buffering(queue);
                NextAction::ResolveAndUnpark { consumer, elem: head, producer }
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
            State::WaitingForDownstream { .. } => {
                panic!("finish while a producer is parked")
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
            State::WaitingForDownstream { .. } => {
                panic!("fail while a producer is parked")
            }
            finished @ State::Finished { .. } => {
                // first terminal event wins
                debug_assert!(false, "fail after a terminal state");
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    /// upstream cancelled: finish, keeping only what a parked producer had
    /// already been granted
    pub(super) fn cancel_up(&mut self) -> TerminalAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle | State::Buffering(_) => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeConsumer(consumer, Ok(None))
            }
            State::WaitingForDownstream { producer, queue, .. } => {
                self.state = State::Finished { queue, error: None };
                TerminalAction::ResumeProducer(producer)
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    /// downstream cancelled: finish and drop everything buffered
    pub(super) fn cancel_down(&mut self) -> TerminalAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Idle | State::Buffering(_) => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::None
            }
            State::WaitingForUpstream { consumer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeConsumer(consumer, Ok(None))
            }
            State::WaitingForDownstream { producer, .. } => {
                self.state = State::Finished { queue: VecDeque::new(), error: None };
                TerminalAction::ResumeProducer(producer)
            }
            finished @ State::Finished { .. } => {
                self.state = finished;
                TerminalAction::None
            }
            State::Modifying => unreachable!("transition observed the modifying guard"),
        }
    }

    /// keyed producer cancellation: acts only if the producer parked under
    /// this id is still parked; a cancel that lost the race against a resume
    /// finds no matching id and is a no-op.
    pub(super) fn cancel_send(&mut self, id: u64) -> TerminalAction<T, E> {
        let parked = matches!(
            &self.state,
            State::WaitingForDownstream { id: parked, .. } if *parked == id
        );
        if parked {
            self.cancel_up()
        } else {
            TerminalAction::None
        }
    }

    /// keyed consumer cancellation: the mirror of `cancel_send` for the
    /// downstream side.
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
}
