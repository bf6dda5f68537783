// implementation of the rendezvous channel.
//
// the basic architecture is as such:
//
// channel handles wrap around Arc<Region<machine state>>
//                                         |
//          /------------------------------/
//          v
//       machine state, one of three emission shapes
//          |
//          |------ Idle: no waiters on either side
//          |
//          |------ Pending: a FIFO queue of parked producers, each holding the
//          |       element it offered plus the suspension handle to resume
//          |       once a consumer takes it
//          |
//          \------ Awaiting: a FIFO queue of parked consumers, keyed by
//                  generation id so cancellation can find them again
//
// plus a terminal flag (set by finish; forces the emission shape back to Idle
// forever) and a tombstone set for consumer cancellations that raced ahead of
// their own suspension.
//
// the organization of these modules is as such:
//
//      machine: the pure state machine. panicky and minimal; every mutating
//               operation returns an action value naming which suspension
//               handles to resume and with what.
//               ^
//               |
//      api:     wrapper around machine that adapts it into a convenient and
//               defensive API: cloneable channel handles, send/next futures
//               that unpark themselves on drop, and a Stream adapter. actions
//               are always performed after the region's lock is released.

mod api;
mod machine;

pub use self::api::{NextFut, RendezvousChannel, RendezvousStream, SendFut};
