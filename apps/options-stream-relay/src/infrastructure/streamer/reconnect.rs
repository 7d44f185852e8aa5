//! Reconnection Policy
//!
//! Exponential backoff with jitter between streamer sessions. Only used when
//! reconnection is enabled; by default the relay exits once the stream ends.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Jitter applied to every delay, as a fraction of the delay.
const DEFAULT_JITTER: f64 = 0.1;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
    /// Randomization as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectConfig {
    /// Build backoff parameters from relay settings.
    #[must_use]
    pub const fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: DEFAULT_JITTER,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Tracks consecutive reconnection attempts and the delay before the next.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.current_delay);
        self.current_delay = self.grown(self.current_delay);
        Some(delay)
    }

    /// Forget past attempts after a session that carried data.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        !self.exhausted()
    }

    const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }

    fn grown(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = delay.as_millis() as f64 * self.config.multiplier;
        let max_millis = self.config.max_delay.as_millis();

        let millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = scaled.round() as u128;
            rounded.min(max_millis)
        } else {
            0
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + offset).max(1.0) as u64;
        Duration::from_millis(millis)
    }
}
