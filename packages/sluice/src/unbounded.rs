//! Unbounded channel with terminal events.
//!
//! Sending never suspends: elements are handed to a parked consumer if one
//! exists, otherwise queued. The channel terminates through [`finish`] or
//! [`fail`]; a terminal event enqueued behind buffered elements surfaces only
//! after they drain. A failure is delivered to the consumer exactly once as
//! `Err(e)`, after which the channel yields `None` forever.
//!
//! [`finish`]: UnboundedChannel::finish
//! [`fail`]: UnboundedChannel::fail

use crate::{
    region::Region,
    resume::{resume_pair, Resumer, Suspended},
};
use futures::Stream;
use std::{
    collections::VecDeque,
    convert::Infallible,
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};


/// outcome delivered to a consumer pull
type Out<T, E> = Result<Option<T>, E>;

/// terminal event
enum Termination<E> {
    Finished,
    Failed(E),
}

/// queued value: an element, or a terminal marker that surfaces once the
/// elements ahead of it have drained
enum Value<T, E> {
    Elem(T),
    Term(Termination<E>),
}

/// a parked consumer, keyed by generation id for cancellation
struct Waiter<T, E> {
    id: u64,
    resume: Resumer<Out<T, E>>,
}

/// channel state.
///
/// invariant: if `waiters` is non-empty then `queue` is empty (a parked
/// consumer is always served before anything is buffered). once `Terminated`,
/// both are gone; all waiters are drained at the transition.
enum State<T, E> {
    Active {
        queue: VecDeque<Value<T, E>>,
        waiters: VecDeque<Waiter<T, E>>,
        /// set once a terminal marker is enqueued; later sends and terminal
        /// calls are ignored
        sealed: bool,
    },
    /// a stored `Failed` downgrades to `Finished` when the failure is taken
    Terminated(Termination<E>),
}

struct Machine<T, E> {
    state: State<T, E>,
    next_id: u64,
}

/// deferred work for a send
enum SendAction<T, E> {
    None,
    Deliver(Resumer<Out<T, E>>, T),
}

/// deferred work for a terminal call
enum TerminateAction<T, E> {
    None,
    FinishAll(Vec<Resumer<Out<T, E>>>),
    FailAll(Vec<Resumer<Out<T, E>>>, E),
}

/// deferred work for a consumer pull
enum NextAction<T, E> {
    Parked,
    Resolve(Resumer<Out<T, E>>, Out<T, E>),
}

impl<T, E> Machine<T, E> {
    fn new() -> Self {
        Machine {
            state: State::Active {
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
                sealed: false,
            },
            next_id: 0,
        }
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn send(&mut self, elem: T) -> SendAction<T, E> {
        match &mut self.state {
            State::Active { sealed: true, .. } | State::Terminated(_) => SendAction::None,
            State::Active { queue, waiters, .. } => {
                if let Some(waiter) = waiters.pop_front() {
                    debug_assert!(queue.is_empty(), "buffered elements behind a parked waiter");
                    SendAction::Deliver(waiter.resume, elem)
                } else {
                    queue.push_back(Value::Elem(elem));
                    SendAction::None
                }
            }
        }
    }

    fn terminate(&mut self, term: Termination<E>) -> TerminateAction<T, E> {
        match &mut self.state {
            State::Active { sealed: true, .. } | State::Terminated(_) => TerminateAction::None,
            State::Active { queue, waiters, sealed } => {
                if !waiters.is_empty() {
                    debug_assert!(queue.is_empty(), "buffered elements behind a parked waiter");
                    let released = waiters.drain(..).map(|waiter| waiter.resume).collect();
                    // the terminal event is consumed by the parked waiters
                    self.state = State::Terminated(Termination::Finished);
                    match term {
                        Termination::Finished => TerminateAction::FinishAll(released),
                        Termination::Failed(error) => TerminateAction::FailAll(released, error),
                    }
                } else if !queue.is_empty() {
                    queue.push_back(Value::Term(term));
                    *sealed = true;
                    TerminateAction::None
                } else {
                    self.state = State::Terminated(term);
                    TerminateAction::None
                }
            }
        }
    }

    fn next(&mut self, id: u64, resume: Resumer<Out<T, E>>) -> NextAction<T, E> {
        match &mut self.state {
            State::Active { queue, waiters, .. } => match queue.pop_front() {
                Some(Value::Elem(elem)) => NextAction::Resolve(resume, Ok(Some(elem))),
                Some(Value::Term(term)) => {
                    debug_assert!(queue.is_empty(), "values queued behind a terminal marker");
                    self.state = State::Terminated(Termination::Finished);
                    match term {
                        Termination::Finished => NextAction::Resolve(resume, Ok(None)),
                        Termination::Failed(error) => NextAction::Resolve(resume, Err(error)),
                    }
                }
                None => {
                    waiters.push_back(Waiter { id, resume });
                    NextAction::Parked
                }
            },
            State::Terminated(term) => match mem::replace(term, Termination::Finished) {
                Termination::Failed(error) => NextAction::Resolve(resume, Err(error)),
                Termination::Finished => NextAction::Resolve(resume, Ok(None)),
            },
        }
    }

    /// remove a parked waiter by id. no-op after termination or if the
    /// waiter was already resumed.
    fn cancel_next(&mut self, id: u64) -> Option<Resumer<Out<T, E>>> {
        match &mut self.state {
            State::Active { waiters, .. } => {
                let pos = waiters.iter().position(|waiter| waiter.id == id)?;
                Some(waiters.remove(pos).unwrap().resume)
            }
            State::Terminated(_) => None,
        }
    }

    fn len(&self) -> usize {
        match &self.state {
            State::Active { queue, .. } => {
                queue.iter().filter(|value| matches!(value, Value::Elem(_))).count()
            }
            State::Terminated(_) => 0,
        }
    }

    fn is_terminated(&self) -> bool {
        match &self.state {
            State::Active { sealed, .. } => *sealed,
            State::Terminated(_) => true,
        }
    }
}

/// Unbounded queue of elements with terminal events; sending never suspends.
///
/// The failure type `E` travels in-band: after [`fail`](Self::fail), the next
/// consumer pull yields `Err(e)`, and every pull after that yields `None`.
/// Channels that never fail can leave `E` at its default of [`Infallible`].
///
/// Parked consumers are resumed in arrival order (lowest generation id
/// first); callers should not rely on anything stronger than "one of the
/// waiters receives the element".
pub struct UnboundedChannel<T, E = Infallible>(Arc<Region<Machine<T, E>>>);

impl<T, E> UnboundedChannel<T, E> {
    /// Create a new, open channel.
    pub fn new() -> Self {
        UnboundedChannel(Arc::new(Region::new(Machine::new())))
    }

    /// Send an element without suspending.
    ///
    /// Hands the element to a parked consumer if one exists, otherwise
    /// buffers it. Discarded if the channel has already terminated.
    pub fn send(&self, elem: T) {
        match self.0.with(|machine| machine.send(elem)) {
            SendAction::None => {}
            SendAction::Deliver(waiter, elem) => waiter.resume(Ok(Some(elem))),
        }
    }

    /// Finish the channel. Buffered elements still drain; afterwards every
    /// pull yields `None`. Ignored after any terminal call.
    pub fn finish(&self) {
        match self.0.with(|machine| machine.terminate(Termination::Finished)) {
            TerminateAction::None => {}
            TerminateAction::FinishAll(released) => {
                for waiter in released {
                    waiter.resume(Ok(None));
                }
            }
            TerminateAction::FailAll(..) => unreachable!("finish produced a failure action"),
        }
    }

    /// Fail the channel. Buffered elements still drain; afterwards one pull
    /// yields `Err(error)`, then every pull yields `None`. Ignored after any
    /// terminal call.
    ///
    /// If several consumers are parked when the failure lands, each of them
    /// observes the error, which is the one place this channel clones it.
    pub fn fail(&self, error: E)
    where
        E: Clone,
    {
        match self.0.with(|machine| machine.terminate(Termination::Failed(error))) {
            TerminateAction::None => {}
            TerminateAction::FinishAll(_) => unreachable!("fail produced a finish action"),
            TerminateAction::FailAll(mut released, error) => {
                let last = released.pop();
                for waiter in released {
                    waiter.resume(Err(error.clone()));
                }
                if let Some(last) = last {
                    last.resume(Err(error));
                }
            }
        }
    }

    /// Take the next element, suspending until one is sent or the channel
    /// terminates.
    pub fn next(&self) -> NextFut<T, E> {
        let (resume, suspended) = resume_pair();
        let (id, action) = self.0.with(|machine| {
            let id = machine.fresh_id();
            (id, machine.next(id, resume))
        });
        match action {
            NextAction::Parked => {}
            NextAction::Resolve(waiter, out) => waiter.resume(out),
        }
        NextFut { channel: self.clone(), id, suspended }
    }

    /// Adapt the consumer side into a [`Stream`] of `Result<T, E>`.
    pub fn stream(&self) -> UnboundedStream<T, E> {
        UnboundedStream { channel: self.clone(), pending: None }
    }

    /// Number of elements currently buffered.
    pub fn len(&self) -> usize {
        self.0.with(|machine| machine.len())
    }

    /// Whether a terminal event has been recorded (it may still be queued
    /// behind buffered elements).
    pub fn is_terminated(&self) -> bool {
        self.0.with(|machine| machine.is_terminated())
    }
}

impl<T, E> Clone for UnboundedChannel<T, E> {
    fn clone(&self) -> Self {
        UnboundedChannel(Arc::clone(&self.0))
    }
}

impl<T, E> Default for UnboundedChannel<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for UnboundedChannel<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("UnboundedChannel")
            .field("len", &self.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Future for taking the next element from an [`UnboundedChannel`].
///
/// If dropped before resolving, the parked consumer is removed and resumed
/// with `None`; cancellation after termination is a no-op.
pub struct NextFut<T, E = Infallible> {
    channel: UnboundedChannel<T, E>,
    id: u64,
    suspended: Suspended<Out<T, E>>,
}

impl<T, E> Future for NextFut<T, E> {
    type Output = Result<Option<T>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().suspended).poll(cx)
    }
}

impl<T, E> Drop for NextFut<T, E> {
    fn drop(&mut self) {
        if !self.suspended.is_resolved() {
            let removed = self.channel.0.with(|machine| machine.cancel_next(self.id));
            if let Some(removed) = removed {
                removed.resume(Ok(None));
            }
        }
    }
}

/// [`Stream`] over the consumer side of an [`UnboundedChannel`].
///
/// A failure is yielded as one `Err(e)` item; the stream ends after it.
pub struct UnboundedStream<T, E = Infallible> {
    channel: UnboundedChannel<T, E>,
    pending: Option<NextFut<T, E>>,
}

impl<T, E> Stream for UnboundedStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let pending = this.pending.get_or_insert_with(|| this.channel.next());
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
