//! Auto-reset event flag.

use core::sync::atomic::{AtomicBool, Ordering};

/// Binary event cleared by the waiter that consumes it.
///
/// Set from driver interrupt context or after a transmission when the
/// controller can accept another frame.
#[derive(Debug, Default)]
pub struct Event {
    state: AtomicBool,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            state: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) {
        self.state.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.state.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    /// Consume the event if it is set.
    pub fn try_wait(&self) -> bool {
        self.state
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Block until the event is set, then consume it.
    pub fn wait(&self) {
        while !self.try_wait() {
            core::hint::spin_loop();
        }
    }
}
