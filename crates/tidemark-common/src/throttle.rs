// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimum-interval gate for repeated log statements.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Allows an action at most once per interval.
///
/// Callers pass the current instant so throttling stays deterministic with
/// an injected clock. Contention is resolved with a compare-and-swap; only
/// one caller wins each interval.
#[derive(Debug)]
pub struct Throttle {
    min_interval_micros: i64,
    last_micros: AtomicI64,
}

impl Throttle {
    /// Create a gate that opens at most once per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval_micros: min_interval.as_micros() as i64,
            last_micros: AtomicI64::new(i64::MIN),
        }
    }

    /// Whether the action may fire at `now`. Claims the interval on success.
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        let now_micros = now.timestamp_micros();
        let last = self.last_micros.load(Ordering::Acquire);
        if last != i64::MIN && now_micros - last < self.min_interval_micros {
            return false;
        }
        self.last_micros
            .compare_exchange(last, now_micros, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_passes_second_is_gated() {
        let throttle = Throttle::new(Duration::from_secs(60));
        let now = Utc::now();
        assert!(throttle.allow(now));
        assert!(!throttle.allow(now + chrono::Duration::seconds(59)));
        assert!(throttle.allow(now + chrono::Duration::seconds(61)));
    }
}
