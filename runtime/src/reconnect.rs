//! Delay between a torn-down session and the next connect attempt.
//!
//! The default multiplier of `1.0` keeps the delay fixed, which is how a
//! connector normally runs. A larger multiplier turns it into exponential
//! backoff capped at `max_delay`.
//!
//! # Example
//!
//! ```rust
//! use bpm_connector_runtime::reconnect::ReconnectPolicy;
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::builder()
//!     .initial_delay(Duration::from_secs(1))
//!     .max_delay(Duration::from_secs(8))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(8));
//! ```

use bpm_connector_core::config::ConnectorConfig;
use std::time::Duration;

/// Reconnect delay configuration.
///
/// # Default Values
///
/// - `initial_delay`: 5 seconds
/// - `max_delay`: 5 seconds
/// - `multiplier`: 1.0 (fixed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Growth factor applied per consecutive failed attempt
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
        }
    }
}

impl ReconnectPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> ReconnectPolicyBuilder {
        ReconnectPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Fixed delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Policy described by the connector configuration.
    #[must_use]
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::builder()
            .initial_delay(config.reconnect_delay())
            .max_delay(config.reconnect_max_delay())
            .multiplier(config.reconnect_multiplier)
            .build()
    }

    /// Calculate the delay after `attempt` consecutive failures (0-based).
    ///
    /// delay = `initial_delay` * (multiplier ^ attempt), capped at `max_delay`
    /// but never below `initial_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        if attempt == 0 || self.multiplier <= 1.0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= cap.as_millis() as f64 {
            cap
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}

/// Builder for [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl ReconnectPolicyBuilder {
    /// Set the delay before the first reconnect attempt.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the upper bound for the delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`ReconnectPolicy`].
    ///
    /// An unset `max_delay` defaults to the initial delay.
    #[must_use]
    pub fn build(self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        let initial_delay = self.initial_delay.unwrap_or(defaults.initial_delay);
        ReconnectPolicy {
            initial_delay,
            max_delay: self.max_delay.unwrap_or(initial_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpm_connector_core::config::EngineConfig;
    use proptest::prelude::*;

    #[test]
    fn default_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..5 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = ReconnectPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(1000))
            .multiplier(2.0)
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn from_config_uses_reconnect_settings() {
        let mut config = ConnectorConfig::new("tasks", EngineConfig::new("http://%s:%s@e", "a", "b"))
            .with_reconnect_delay(Duration::from_millis(250));
        config.reconnect_max_delay_ms = Some(2000);
        config.reconnect_multiplier = 2.0;

        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(
            initial_ms in 1u64..10_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let policy = ReconnectPolicy::builder()
                .initial_delay(Duration::from_millis(initial_ms))
                .max_delay(Duration::from_millis(initial_ms + extra_ms))
                .multiplier(multiplier)
                .build();

            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay >= policy.initial_delay);
            prop_assert!(delay <= policy.max_delay);
        }
    }
}
