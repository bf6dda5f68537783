//! Tokio utility.

use std::future::Future;
use tokio::task::{spawn, AbortHandle};


/// Labelled handle to a spawned background task, aborting the task if
/// dropped.
///
/// The drainer and splitter-pump tasks are owned through this, so dropping
/// the consumer-side iterator cancels the background task. The label tags the
/// task's lifecycle trace events.
pub(crate) struct AbortOnDrop {
    label: &'static str,
    handle: AbortHandle,
}

impl AbortOnDrop {
    /// Spawn a tokio task and wrap its abort handle.
    pub(crate) fn spawn<F>(label: &'static str, f: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        trace!("spawning {}", label);
        AbortOnDrop { label, handle: spawn(f).abort_handle() }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            trace!("aborting {}", self.label);
        }
        self.handle.abort();
    }
}
