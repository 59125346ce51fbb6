//! Monotonic millisecond clock used for task timestamps.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds elapsed since the process-wide epoch (fixed on first call).
pub fn monotonic_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}
