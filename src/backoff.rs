//! Reconnection delay with exponential growth and jitter.
use std::time::{Duration, Instant};

use rand::{thread_rng, Rng};

/// Configuration for [`BackoffStrategy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay base for the first retry.
    ///
    /// Defaults to [`BackoffConfig::DEFAULT_FIRST_DELAY`].
    pub first_delay: Duration,
    /// Upper bound for the delay base. Also the delay returned when the maximum is forced.
    ///
    /// Defaults to [`BackoffConfig::DEFAULT_MAX_DELAY`].
    pub max_delay: Duration,
    /// If the last good connection attempt is older than this, the retry counter starts over.
    ///
    /// Defaults to [`BackoffConfig::DEFAULT_RESET_INTERVAL`].
    pub reset_interval: Duration,
    /// Fraction of the delay base that is randomized. Must lie in `[0, 1]`.
    ///
    /// Defaults to [`BackoffConfig::DEFAULT_JITTER_RATIO`].
    pub jitter_ratio: f64,
}

impl BackoffConfig {
    /// Default value for [`BackoffConfig::first_delay`].
    pub const DEFAULT_FIRST_DELAY: Duration = Duration::from_secs(1);
    /// Default value for [`BackoffConfig::max_delay`].
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
    /// Default value for [`BackoffConfig::reset_interval`].
    pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`BackoffConfig::jitter_ratio`].
    pub const DEFAULT_JITTER_RATIO: f64 = 0.5;

    /// Create a new `BackoffConfig` using default configuration.
    pub fn new() -> BackoffConfig {
        BackoffConfig::default()
    }

    pub fn with_first_delay(mut self, first_delay: Duration) -> BackoffConfig {
        self.first_delay = first_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> BackoffConfig {
        self.max_delay = max_delay;
        self
    }

    pub fn with_reset_interval(mut self, reset_interval: Duration) -> BackoffConfig {
        self.reset_interval = reset_interval;
        self
    }

    /// Update the jitter ratio. A ratio outside `[0, 1]` falls back to the default.
    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> BackoffConfig {
        self.jitter_ratio = if (0.0..=1.0).contains(&jitter_ratio) {
            jitter_ratio
        } else {
            BackoffConfig::DEFAULT_JITTER_RATIO
        };
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            first_delay: BackoffConfig::DEFAULT_FIRST_DELAY,
            max_delay: BackoffConfig::DEFAULT_MAX_DELAY,
            reset_interval: BackoffConfig::DEFAULT_RESET_INTERVAL,
            jitter_ratio: BackoffConfig::DEFAULT_JITTER_RATIO,
        }
    }
}

/// Computes the delay before the next reconnection attempt.
#[derive(Debug)]
pub struct BackoffStrategy {
    config: BackoffConfig,
    latest_good_run: Option<Instant>,
    retry_count: u32,
}

impl BackoffStrategy {
    pub fn new(config: BackoffConfig) -> BackoffStrategy {
        BackoffStrategy {
            config,
            latest_good_run: None,
            retry_count: 0,
        }
    }

    /// Record the start of a connection attempt.
    pub fn mark_good_run_now(&mut self) {
        self.latest_good_run = Some(Instant::now());
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay before the next attempt. `force_max` returns the maximum delay and restarts the
    /// exponential sequence.
    pub fn next_delay(&mut self, force_max: bool) -> Duration {
        if let Some(good_run) = self.latest_good_run {
            if good_run.elapsed() > self.config.reset_interval {
                self.retry_count = 0;
            }
        }

        if force_max {
            self.retry_count = 0;
            return self.config.max_delay;
        }

        let base = self.base_delay();
        let jitter = base.mul_f64(self.config.jitter_ratio * thread_rng().gen::<f64>());
        self.retry_count = self.retry_count.saturating_add(1);
        jitter + base / 2
    }

    fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.retry_count);
        self.config
            .first_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BackoffConfig, BackoffStrategy};

    #[test]
    fn force_max_returns_max_delay() {
        let mut backoff = BackoffStrategy::new(BackoffConfig::default());
        backoff.next_delay(false);
        backoff.next_delay(false);
        assert_eq!(backoff.next_delay(true), Duration::from_secs(60));
        assert_eq!(backoff.retry_count(), 0);
    }

    #[test]
    fn delay_stays_within_bounds() {
        let mut backoff = BackoffStrategy::new(BackoffConfig::default());
        for attempt in 0..10u32 {
            let base = Duration::from_secs(1)
                .saturating_mul(2u32.pow(attempt))
                .min(Duration::from_secs(60));
            let delay = backoff.next_delay(false);
            assert!(delay >= base / 2, "{delay:?} must be >= {:?}", base / 2);
            assert!(delay <= base, "{delay:?} must be <= {base:?}");
        }
        assert_eq!(backoff.retry_count(), 10);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = BackoffConfig::new().with_jitter_ratio(0.0);
        let mut backoff = BackoffStrategy::new(config);
        assert_eq!(backoff.next_delay(false), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(false), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(false), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(false), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = BackoffConfig::new()
            .with_jitter_ratio(0.0)
            .with_max_delay(Duration::from_secs(3));
        let mut backoff = BackoffStrategy::new(config);
        for _ in 0..100 {
            backoff.next_delay(false);
        }
        assert_eq!(backoff.next_delay(false), Duration::from_millis(1500));
    }

    #[test]
    fn long_good_run_resets_counter() {
        let config = BackoffConfig::new()
            .with_jitter_ratio(0.0)
            .with_reset_interval(Duration::ZERO);
        let mut backoff = BackoffStrategy::new(config);
        backoff.next_delay(false);
        backoff.next_delay(false);
        backoff.mark_good_run_now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(backoff.next_delay(false), Duration::from_millis(500));
    }

    #[test]
    fn invalid_jitter_ratio_falls_back_to_default() {
        assert_eq!(BackoffConfig::new().with_jitter_ratio(1.5).jitter_ratio, 0.5);
        assert_eq!(BackoffConfig::new().with_jitter_ratio(-0.1).jitter_ratio, 0.5);
        assert_eq!(BackoffConfig::new().with_jitter_ratio(1.0).jitter_ratio, 1.0);
    }
}
