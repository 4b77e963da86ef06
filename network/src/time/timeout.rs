//! One-shot millisecond timers.

use super::Tick;

/// Optional deadline, wraparound safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timer {
    deadline: Option<Tick>,
}

impl Timer {
    pub const fn stopped() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer to fire `ms` after `now`.
    pub fn start(&mut self, now: Tick, ms: u32) {
        self.deadline = Some(now.add_ms(ms));
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Tick> {
        self.deadline
    }

    /// Armed and at or past its deadline.
    pub fn is_expired(&self, now: Tick) -> bool {
        match self.deadline {
            Some(d) => now.has_reached(d),
            None => false,
        }
    }

    /// Milliseconds left before expiry, zero when expired or stopped.
    pub fn remaining(&self, now: Tick) -> u32 {
        match self.deadline {
            Some(d) => d.elapsed_since(now),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_across_wrap() {
        let mut t = Timer::stopped();
        assert!(!t.is_expired(Tick(0)));

        let now = Tick(u32::MAX - 50);
        t.start(now, 100);
        assert!(t.is_running());
        assert!(!t.is_expired(now.add_ms(99)));
        assert_eq!(t.remaining(now.add_ms(40)), 60);
        assert!(t.is_expired(now.add_ms(100)));
        assert_eq!(t.remaining(now.add_ms(150)), 0);

        t.stop();
        assert!(!t.is_expired(now.add_ms(500)));
    }
}
