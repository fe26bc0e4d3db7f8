//! Process-wide monotonic clock helpers.
//!
//! All supervisor timestamps are monotonic nanoseconds/milliseconds since
//! process start, anchored once so values are comparable across tasks.

use std::sync::OnceLock;
use std::time::Instant;

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Monotonic nanoseconds since process start.
#[inline]
pub fn mono_ns() -> u64 {
    anchor().elapsed().as_nanos() as u64
}

/// Monotonic milliseconds since process start, fractional.
#[inline]
pub fn mono_ms() -> f64 {
    anchor().elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_non_decreasing() {
        let a = mono_ns();
        let b = mono_ns();
        assert!(b >= a);
        assert!(mono_ms() >= 0.0);
    }
}
