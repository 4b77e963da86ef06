//! Time and timing module.
//!
//! The stack runs off a free-running millisecond counter supplied by the
//! platform. The counter is 32 bits wide and wraps roughly every 49.7 days,
//! so every comparison goes through signed wrapping differences.
//!
//! - [`Tick`]: wrapping millisecond timestamp
//! - [`ExtendedClock`]: widens the wrapping counter to 64 bits for lease
//!   arithmetic that spans longer than one wrap period
//! - [`Timer`]: optional one-shot deadline

mod timeout;

pub use timeout::Timer;

/// Interval at which the interface tick is expected to run.
pub const TICK_INTERVAL_MS: u32 = 100;

/// Wrapping millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub const fn from_millis(ms: u32) -> Self {
        Tick(ms)
    }

    pub const fn millis(self) -> u32 {
        self.0
    }

    /// Timestamp `ms` milliseconds later.
    pub const fn add_ms(self, ms: u32) -> Tick {
        Tick(self.0.wrapping_add(ms))
    }

    /// Signed distance from `earlier` to `self`.
    ///
    /// Valid as long as the two instants are less than 2^31 ms apart.
    pub const fn diff(self, earlier: Tick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// `self` strictly precedes `other`.
    pub const fn is_before(self, other: Tick) -> bool {
        self.diff(other) < 0
    }

    /// `self` strictly follows `other`.
    pub const fn is_after(self, other: Tick) -> bool {
        self.diff(other) > 0
    }

    /// `self` is at or past `deadline`.
    pub const fn has_reached(self, deadline: Tick) -> bool {
        self.diff(deadline) >= 0
    }

    /// Milliseconds elapsed since `start`, zero if `start` lies ahead.
    pub const fn elapsed_since(self, start: Tick) -> u32 {
        let d = self.diff(start);
        if d < 0 {
            0
        } else {
            d as u32
        }
    }
}

/// Widens a wrapping [`Tick`] stream into a monotonic 64-bit millisecond count.
///
/// Must be fed at least once per wrap period.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedClock {
    last: u32,
    base: u64,
    started: bool,
}

impl ExtendedClock {
    pub const fn new() -> Self {
        Self {
            last: 0,
            base: 0,
            started: false,
        }
    }

    /// Advance to `now` and return the 64-bit time in ms.
    pub fn update(&mut self, now: Tick) -> u64 {
        if !self.started {
            self.started = true;
            self.last = now.0;
            self.base = now.0 as u64;
            return self.base;
        }
        let delta = now.0.wrapping_sub(self.last);
        // A backward step (stale timestamp) is ignored.
        if (delta as i32) >= 0 {
            self.base += delta as u64;
            self.last = now.0;
        }
        self.base
    }

    /// Last value returned by [`update`](Self::update).
    pub fn now(&self) -> u64 {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_across_wrap() {
        let before = Tick(u32::MAX - 10);
        let after = before.add_ms(20);
        assert_eq!(after, Tick(9));
        assert!(before.is_before(after));
        assert!(after.is_after(before));
        assert!(!after.is_before(before));
        assert_eq!(after.diff(before), 20);
        assert_eq!(after.elapsed_since(before), 20);
        assert_eq!(before.elapsed_since(after), 0);
    }

    #[test]
    fn test_has_reached() {
        let deadline = Tick(u32::MAX).add_ms(1);
        assert!(Tick(0).has_reached(deadline));
        assert!(!Tick(u32::MAX).has_reached(deadline));
        assert!(Tick(5).has_reached(deadline));
    }

    #[test]
    fn test_extended_clock_wraps() {
        let mut clock = ExtendedClock::new();
        assert_eq!(clock.update(Tick(u32::MAX - 1)), (u32::MAX - 1) as u64);
        assert_eq!(clock.update(Tick(3)), u32::MAX as u64 + 4);
        // stale sample
        assert_eq!(clock.update(Tick(1)), u32::MAX as u64 + 4);
        assert_eq!(clock.now(), u32::MAX as u64 + 4);
    }
}
