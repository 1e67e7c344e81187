//! Exponential reconnect backoff.
//!
//! After each failed connection the delay before the next attempt
//! doubles, up to a ceiling. A successful open resets it.
//!
//! ```text
//! 1s → 2s → 4s → 8s → 10s → 10s → …   (defaults)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the delay between attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Factor by which the delay grows after each failure.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

// ============================================================================
// BackoffConfig
// ============================================================================

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
#[must_use]
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

// ============================================================================
// Backoff
// ============================================================================

/// Current position in the backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Starts a sequence at the configured initial delay.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
        }
    }

    /// Delay the next scheduled reconnect will wait.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the current delay and advances the sequence.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_delay(delay, &self.config);
        delay
    }

    /// Goes back to the initial delay. Called on a successful open.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }
}

// ============================================================================
// Tests
// ============================================================================
