//! Backoff policy for re-establishing dropped change feeds.

use std::time::Duration;

use rand::Rng;

use crate::config::SyncConfig;

/// Exponential delay for the given attempt (1-based), capped, without jitter.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    const MAX_EXPONENT: u32 = 16;

    let exp = attempt.saturating_sub(1).min(MAX_EXPONENT);
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(1_u64 << exp).min(max_ms))
}

/// Backoff delay plus up to 20% random jitter.
pub fn backoff_with_jitter(attempt: u32, base: Duration, max: Duration) -> Duration {
    let backoff = backoff_delay(attempt, base, max);
    let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=(backoff_ms / 5).max(1));
    Duration::from_millis(backoff_ms.saturating_add(jitter))
}

/// Tracks consecutive reconnect attempts for one feed.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base: config.reconnect_base_delay,
            max: config.reconnect_max_delay,
            max_attempts: config.max_reconnect_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.max_attempts {
            if self.attempts >= limit {
                return None;
            }
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(backoff_with_jitter(self.attempts, self.base, self.max))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
