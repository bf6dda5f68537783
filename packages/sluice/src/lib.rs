//! Primitives for moving values between concurrently executing producers and
//! consumers, with well-defined suspension, back-pressure, and cancellation
//! semantics.
//!
//! The kit is small and composable:
//!
//! - [`RendezvousChannel`]: unbuffered meeting point; each send suspends until
//!   a consumer takes the element.
//! - [`UnboundedChannel`]: unbounded queue with terminal events; sending never
//!   suspends, failures terminate the stream in-band.
//! - [`SluiceStreamExt::buffer`] / [`SluiceStreamExt::buffer_policy`]: bounded
//!   buffering operators over any [`futures::Stream`], with producer
//!   suspension or an overflow [`Policy`].
//! - [`SluiceStreamExt::split`] / [`SluiceStreamExt::unzip`]: fan one upstream
//!   out to two lock-stepped downstream sides.
//!
//! Everything is built around the same discipline: a mutex-protected state
//! machine whose transitions return *actions* (which suspension handles to
//! resume, and with what), performed only after the lock is released.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod region;
mod resume;
mod util;

pub mod buffer;
pub mod rendezvous;
pub mod split;
pub mod unbounded;

mod ext;

pub use crate::buffer::{Buffered, Policy, QueueBuffered, TryBuffered, TryQueueBuffered};
pub use crate::ext::SluiceStreamExt;
pub use crate::rendezvous::RendezvousChannel;
pub use crate::split::{SplitStream, UnzipFirst, UnzipSecond};
pub use crate::unbounded::UnboundedChannel;
