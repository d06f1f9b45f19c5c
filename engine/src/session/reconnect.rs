// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::Duration;

/// Delay applied after a keepalive timeout: those are usually transient
/// stalls, so recovery is attempted almost immediately.
pub(crate) const KEEPALIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The wait before reconnection attempt number `tries`.
///
/// Fixed tiers rather than a continuous exponential curve: a handful of
/// quick attempts, then progressively patient ones, capped at a minute.
pub(crate) fn delay_for_tries(tries: u32) -> Duration {
    Duration::from_secs(match tries {
        0..=4 => 10,
        5..=9 => 20,
        10..=14 => 40,
        _ => 60,
    })
}

/// Tracks consecutive failed connection attempts and whether further
/// attempts are allowed at all.
#[derive(Debug)]
pub(crate) struct ReconnectPolicy {
    /// Whether automatic reconnection is enabled at all.
    enabled: bool,

    /// Consecutive failed attempts since the last authenticated
    /// connection.
    tries: u32,

    /// Set when a stream-ending condition (superseded session, bad
    /// credentials) makes further attempts pointless.
    suppressed: bool,
}

impl ReconnectPolicy {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tries: 0,
            suppressed: false,
        }
    }

    /// Whether another attempt should be made.
    pub(crate) fn should_reconnect(&self) -> bool {
        self.enabled && !self.suppressed
    }

    /// The delay before the next attempt, counting this attempt as
    /// failed.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = delay_for_tries(self.tries);
        self.tries = self.tries.saturating_add(1);
        delay
    }

    /// Record a successful authenticated connection.
    pub(crate) fn record_success(&mut self) {
        self.tries = 0;
    }

    /// Permanently stop reconnecting.
    pub(crate) fn suppress(&mut self) {
        self.suppressed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_tiers() {
        let cases = [
            (0, 10),
            (4, 10),
            (5, 20),
            (9, 20),
            (10, 40),
            (14, 40),
            (15, 60),
            (20, 60),
        ];
        for (tries, secs) in cases {
            assert_eq!(
                delay_for_tries(tries),
                Duration::from_secs(secs),
                "tries = {}",
                tries
            );
        }
    }

    #[test]
    fn success_resets_the_counter() {
        let mut policy = ReconnectPolicy::new(true);
        for _ in 0..7 {
            policy.next_delay();
        }
        assert_eq!(policy.next_delay(), Duration::from_secs(20));
        policy.record_success();
        assert_eq!(policy.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn suppression_is_permanent() {
        let mut policy = ReconnectPolicy::new(true);
        assert!(policy.should_reconnect());
        policy.suppress();
        assert!(!policy.should_reconnect());
        policy.record_success();
        assert!(!policy.should_reconnect());
    }

    #[test]
    fn disabled_policy_never_reconnects() {
        let policy = ReconnectPolicy::new(false);
        assert!(!policy.should_reconnect());
    }

    #[test]
    fn keepalive_retry_is_short() {
        assert!(KEEPALIVE_RETRY_DELAY < delay_for_tries(0));
    }
}
