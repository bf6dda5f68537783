//! Library utilities.

pub(crate) mod abort_on_drop;
