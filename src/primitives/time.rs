// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Monotonic time helpers. The tag runtime schedules auto-sync reads/writes
//! and blocking-call deadlines in milliseconds since an arbitrary epoch; we
//! use `std::time::Instant` under the hood rather than wall-clock time so
//! NTP adjustments can't make a deadline run backwards.

use std::time::{Duration, Instant};

/// Monotonic milliseconds elapsed since this process's first call into the
/// library. Only meaningful relative to another call to `now_ms()`.
pub fn now_ms() -> u64 {
    static START: once_cell::sync::OnceCell<Instant> = once_cell::sync::OnceCell::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// An absolute deadline expressed as monotonic milliseconds, checked with a
/// "while time remaining" polling idiom (`libplctag`'s own C implementation
/// has this loop condition inverted, which this crate deliberately does not
/// copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    /// A deadline `timeout` from now. `Duration::ZERO` yields an
    /// already-expired deadline, matching the "timeout=0 means don't block"
    /// convention used throughout the public API.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at_ms: now_ms() + timeout.as_millis() as u64,
        }
    }

    /// `true` while there is time left to wait.
    pub fn has_time_remaining(&self) -> bool {
        now_ms() < self.at_ms
    }

    /// Remaining duration, `Duration::ZERO` if already expired.
    pub fn remaining(&self) -> Duration {
        let now = now_ms();
        if now >= self.at_ms {
            Duration::ZERO
        } else {
            Duration::from_millis(self.at_ms - now)
        }
    }
}

/// Rounds `next` forward to the next whole multiple of `period_ms` that is
/// strictly greater than `now`, used by auto-sync scheduling so jitter never
/// accumulates drift. Returns `(new_next, skipped)` where `skipped` is the
/// number of whole periods that were missed and silently skipped over.
pub fn round_to_next_period(now: u64, next: u64, period_ms: u64) -> (u64, u64) {
    if period_ms == 0 || now < next {
        return (next, 0);
    }
    let behind = now - next;
    let skipped = behind / period_ms + 1;
    (next + skipped * period_ms, skipped.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_zero_has_no_time_remaining() {
        let d = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(!d.has_time_remaining());
    }

    #[test]
    fn round_to_next_period_skips_missed_boundaries() {
        // next was due at 100, we're now at 355, period 100 -> next boundary
        // strictly after 355 is 400, and we skipped 2 whole periods (200, 300).
        let (next, skipped) = round_to_next_period(355, 100, 100);
        assert_eq!(next, 400);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn round_to_next_period_no_miss() {
        let (next, skipped) = round_to_next_period(50, 100, 100);
        assert_eq!(next, 100);
        assert_eq!(skipped, 0);
    }
}
