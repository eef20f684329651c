//! Exponential backoff policies for reconnection and send retries.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Deserialize;

/// Backoff used by the supervisor when a bridge drops or fails to connect.
///
/// Retries are unbounded; only the interval is capped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt, in seconds.
    pub initial_delay_secs: u64,
    /// Maximum delay between attempts, in seconds.
    pub max_delay_secs: u64,
    /// Multiplier for each successive attempt.
    pub multiplier: f32,
    /// Randomize delays so bridges do not reconnect in lockstep.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            max_delay_secs: 300,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Fresh, unbounded backoff iterator. Build a new one after every
    /// successful connection to reset it.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(self.initial_delay_secs))
            .with_max_delay(Duration::from_secs(self.max_delay_secs.max(self.initial_delay_secs)))
            .with_factor(self.multiplier.max(1.0))
            .without_max_times();
        if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Per-bridge retry policy for individual outbound operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Bounded backoff iterator yielding at most `max_retries` delays.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_factor(2.0)
            .with_max_times(self.max_retries)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_backoff_is_capped_and_unbounded() {
        let config = ReconnectConfig {
            initial_delay_secs: 1,
            max_delay_secs: 8,
            multiplier: 2.0,
            jitter: false,
        };
        let delays: Vec<Duration> = config.backoff().take(20).collect();
        assert_eq!(delays.len(), 20);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(8)));
        assert_eq!(delays[19], Duration::from_secs(8));
    }

    #[test]
    fn test_retry_policy_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff().count(), 3);
        let none = RetryPolicy {
            max_retries: 0,
            ..policy
        };
        assert_eq!(none.backoff().count(), 0);
    }
}
