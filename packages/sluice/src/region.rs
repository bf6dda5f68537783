//! Mutex-guarded box with a critical-region primitive.

use std::sync::Mutex;


/// Mutex-guarded box around some interior state.
///
/// `with` executes a closure with exclusive access to the state and returns
/// the closure's value. All of the crate's state machines live inside one of
/// these; the closure computes an action value naming which suspension
/// handles to resume, and the caller performs the resumptions after the lock
/// is released. The closure must not suspend or re-enter the same region.
pub struct Region<S>(Mutex<S>);

impl<S> Region<S> {
    /// Construct around an initial state.
    pub fn new(state: S) -> Self {
        Region(Mutex::new(state))
    }

    /// Run `f` with exclusive access to the state, returning its value.
    ///
    /// The lock is released on all paths out of `f`, including panics.
    pub fn with<O>(&self, f: impl FnOnce(&mut S) -> O) -> O {
        let mut lock = self.0.lock().unwrap();
        f(&mut *lock)
    }
}
