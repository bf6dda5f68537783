// implementation of the fan-out splitter.
//
// the basic architecture is as such:
//
// split handles share an Arc<SplitShared>
//          |
//          |------ base: Region over the pump state. NotStarted holds the
//          |       upstream until the first pull from either side; Running
//          |       holds the pump task handle (aborted when dropped). this is
//          |       also the guard that at most one pull of the upstream is
//          |       ever in flight: the pump is the only puller.
//          |
//          |------ children: Region over the per-side sets of live iterator
//          |       ids plus the id counter. a side whose set empties has its
//          |       channel finished; when both sides are gone the pump is
//          |       stopped.
//          |
//          \------ first/second: one rendezvous channel per side.
//
// the pump amplifies one upstream pull into two sends, one per side, awaited
// together. a rendezvous send only resolves when a consumer takes the element
// (or its channel has finished, in which case it resolves immediately without
// delivery), so the upstream advances only once both live sides have consumed
// the previous element.

use crate::{
    region::Region,
    rendezvous::{NextFut, RendezvousChannel},
    util::abort_on_drop::AbortOnDrop,
};
use futures::Future;
use futures::{future, pin_mut, Stream, StreamExt};
use std::{
    collections::HashSet,
    fmt::{self, Debug, Formatter},
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};


/// pump lifecycle
enum BaseState<S> {
    /// upstream parked until the first pull from either side
    NotStarted(S),
    /// pump task spawned; dropping the handle aborts it
    Running(AbortOnDrop),
    /// pump finished or aborted
    Stopped,
}

/// live iterator bookkeeping
struct Children {
    firsts: HashSet<u64>,
    seconds: HashSet<u64>,
    next_id: u64,
}

#[derive(Copy, Clone)]
enum Side {
    First,
    Second,
}

struct SplitShared<S: Stream> {
    base: Region<BaseState<S>>,
    children: Region<Children>,
    first: RendezvousChannel<S::Item>,
    second: RendezvousChannel<S::Item>,
}

impl<S: Stream> SplitShared<S> {
    fn channel(&self, side: Side) -> &RendezvousChannel<S::Item> {
        match side {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }

    fn ensure_started(&self)
    where
        S: Send + 'static,
        S::Item: Clone + Send + 'static,
    {
        self.base.with(|base| {
            if matches!(base, BaseState::NotStarted(_)) {
                let BaseState::NotStarted(upstream) = mem::replace(base, BaseState::Stopped)
                else {
                    unreachable!()
                };
                let pump = pump(upstream, self.first.clone(), self.second.clone());
                *base = BaseState::Running(AbortOnDrop::spawn("splitter pump", pump));
            }
        });
    }
}

async fn pump<S: Stream>(
    upstream: S,
    first: RendezvousChannel<S::Item>,
    second: RendezvousChannel<S::Item>,
) where
    S::Item: Clone,
{
    pin_mut!(upstream);
    while let Some(elem) = upstream.next().await {
        // awaited together: the next upstream pull happens only after both
        // sides have taken the element (a finished side resolves immediately)
        let to_first = first.send(elem.clone());
        let to_second = second.send(elem);
        future::join(to_first, to_second).await;
    }
    trace!("splitter upstream finished");
    first.finish();
    second.finish();
}

/// Split one upstream into two downstream sides that each observe the whole
/// element sequence, in order, in lock-step.
pub(crate) fn split<S: Stream>(upstream: S) -> (SplitStream<S>, SplitStream<S>) {
    let shared = Arc::new(SplitShared {
        base: Region::new(BaseState::NotStarted(upstream)),
        children: Region::new(Children {
            firsts: HashSet::new(),
            seconds: HashSet::new(),
            next_id: 0,
        }),
        first: RendezvousChannel::new(),
        second: RendezvousChannel::new(),
    });
    let first = SplitStream::register(&shared, Side::First);
    let second = SplitStream::register(&shared, Side::Second);
    (first, second)
}

/// Split a stream of pairs into its two projections.
pub(crate) fn unzip<S, A, B>(upstream: S) -> (UnzipFirst<S>, UnzipSecond<S>)
where
    S: Stream<Item = (A, B)>,
{
    let (first, second) = split(upstream);
    (UnzipFirst(first), UnzipSecond(second))
}

/// One downstream side of a [`split`](crate::SluiceStreamExt::split).
///
/// Both sides observe the upstream's elements in the upstream's order, and
/// the upstream only advances once both sides have consumed the previous
/// element. Cloning registers another iterator on the same side: iterators
/// sharing a side split that side's elements between them, each element going
/// to exactly one of them.
///
/// Dropping the last iterator of a side releases that side; the other side
/// keeps draining the upstream on its own. Dropping both sides cancels the
/// upstream pump.
pub struct SplitStream<S: Stream> {
    shared: Arc<SplitShared<S>>,
    side: Side,
    id: u64,
    pending: Option<NextFut<S::Item>>,
}

impl<S: Stream> SplitStream<S> {
    fn register(shared: &Arc<SplitShared<S>>, side: Side) -> Self {
        let id = shared.children.with(|children| {
            let id = children.next_id;
            children.next_id = children.next_id.wrapping_add(1);
            match side {
                Side::First => children.firsts.insert(id),
                Side::Second => children.seconds.insert(id),
            };
            id
        });
        SplitStream { shared: Arc::clone(shared), side, id, pending: None }
    }
}

impl<S: Stream> Clone for SplitStream<S> {
    fn clone(&self) -> Self {
        Self::register(&self.shared, self.side)
    }
}

impl<S: Stream> Drop for SplitStream<S> {
    fn drop(&mut self) {
        // unpark any in-flight pull before deciding side liveness
        self.pending = None;
        let (side_empty, both_empty) = self.shared.children.with(|children| {
            let set = match self.side {
                Side::First => &mut children.firsts,
                Side::Second => &mut children.seconds,
            };
            set.remove(&self.id);
            let side_empty = set.is_empty();
            (side_empty, children.firsts.is_empty() && children.seconds.is_empty())
        });
        if side_empty {
            trace!("splitter side closed");
            self.shared.channel(self.side).finish();
        }
        if both_empty {
            let stopped = self.shared.base.with(|base| mem::replace(base, BaseState::Stopped));
            // dropping a Running handle aborts the pump
            drop(stopped);
        }
    }
}

impl<S> Stream for SplitStream<S>
where
    S: Stream + Send + 'static,
    S::Item: Clone + Send + 'static,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<S::Item>> {
        let this = self.get_mut();
        this.shared.ensure_started();
        let channel = this.shared.channel(this.side);
        let pending = this.pending.get_or_insert_with(|| channel.next());
        let polled = Pin::new(pending).poll(cx);
        if polled.is_ready() {
            this.pending = None;
        }
        polled
    }
}

impl<S: Stream> Debug for SplitStream<S> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let side = match self.side {
            Side::First => "first",
            Side::Second => "second",
        };
        f.debug_struct("SplitStream").field("side", &side).field("id", &self.id).finish()
    }
}

/// First projection of an [`unzip`](crate::SluiceStreamExt::unzip).
pub struct UnzipFirst<S: Stream>(SplitStream<S>);

impl<S, A, B> Stream for UnzipFirst<S>
where
    S: Stream<Item = (A, B)> + Send + 'static,
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    type Item = A;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<A>> {
        Pin::new(&mut self.get_mut().0).poll_next(cx).map(|opt| opt.map(|(a, _)| a))
    }
}

/// Second projection of an [`unzip`](crate::SluiceStreamExt::unzip).
pub struct UnzipSecond<S: Stream>(SplitStream<S>);

impl<S, A, B> Stream for UnzipSecond<S>
where
    S: Stream<Item = (A, B)> + Send + 'static,
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    type Item = B;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<B>> {
        Pin::new(&mut self.get_mut().0).poll_next(cx).map(|opt| opt.map(|(_, b)| b))
    }
}
