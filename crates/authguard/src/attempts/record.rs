//! Per-client failed login record.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Failed login attempts for one client address.
///
/// `blocked_until` is set exactly once per block episode, when
/// `attempt_count` reaches the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    pub attempt_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub first_attempt_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub blocked_until: Option<OffsetDateTime>,
}

impl LoginAttemptRecord {
    /// A record for a first failure at `now`.
    pub fn first_failure(now: OffsetDateTime) -> Self {
        Self {
            attempt_count: 1,
            first_attempt_at: now,
            last_attempt_at: now,
            blocked_until: None,
        }
    }

    pub fn is_blocked(&self, now: OffsetDateTime) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Seconds until the block lifts, rounded up. `None` when not blocked.
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> Option<u64> {
        let until = self.blocked_until.filter(|until| *until > now)?;
        let remaining = (until - now).as_seconds_f64().ceil() as u64;
        Some(remaining.max(1))
    }

    /// Whether the record no longer counts toward a block.
    ///
    /// An episode ends when its block has lifted, or, if it never reached a
    /// block, once the last failure is older than `window`.
    pub fn episode_over(&self, now: OffsetDateTime, window: Duration) -> bool {
        match self.blocked_until {
            Some(until) => now >= until,
            None => now - self.last_attempt_at > window,
        }
    }

    /// Registers one more failure. Returns `true` when this failure starts a
    /// block.
    pub fn register_failure(
        &mut self,
        now: OffsetDateTime,
        threshold: u32,
        block_duration: Duration,
    ) -> bool {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = now;
        self.block_if_threshold_reached(now, threshold, block_duration)
    }

    pub(crate) fn block_if_threshold_reached(
        &mut self,
        now: OffsetDateTime,
        threshold: u32,
        block_duration: Duration,
    ) -> bool {
        if self.blocked_until.is_none() && self.attempt_count >= threshold {
            self.blocked_until = Some(block_end(now, block_duration));
            return true;
        }
        false
    }
}

/// End of a block starting at `now`, clamped to the latest representable time.
fn block_end(now: OffsetDateTime, block_duration: Duration) -> OffsetDateTime {
    let block = time::Duration::try_from(block_duration).unwrap_or(time::Duration::MAX);
    now.saturating_add(block)
}
