//! Safe time utilities.
//!
//! Provides panic-free system time access with graceful fallback for
//! misconfigured or pre-epoch system clocks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the UTC time in seconds since the Unix epoch. Returns 0 if the
/// system clock is set before the epoch.
#[inline]
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Returns the UTC time in milliseconds since the Unix epoch. Returns 0 if
/// the system clock is set before the epoch.
#[inline]
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_seconds_advances() {
        let a = epoch_seconds();
        let b = epoch_seconds();
        assert!(b >= a);
        // Sanity: past 2020-01-01, clocks in test environments are set.
        assert!(a > 1_577_836_800);
    }

    #[test]
    fn test_millis_consistent_with_seconds() {
        let secs = epoch_seconds();
        let millis = epoch_millis();
        assert!(millis / 1000 >= secs.saturating_sub(1));
    }
}
