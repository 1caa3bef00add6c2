//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync passes and the periodic driver.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Maximum number of entity-type passes [`crate::SyncEngine::run_all`]
    /// runs at once.
    pub max_concurrent_passes: usize,
    /// Whether a failed record waits out its backoff delay before the next
    /// push attempt.
    pub record_pacing: bool,
    /// Interval between rounds of the periodic driver.
    pub sync_interval: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrent_passes: 4,
            record_pacing: false,
            sync_interval: Duration::from_secs(15 * 60),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the number of passes run concurrently.
    pub fn with_max_concurrent_passes(mut self, passes: usize) -> Self {
        self.max_concurrent_passes = passes.max(1);
        self
    }

    /// Enables or disables per-record pacing.
    pub fn with_record_pacing(mut self, enabled: bool) -> Self {
        self.record_pacing = enabled;
        self
    }

    /// Sets the periodic driver interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Consecutive failed pushes after which a record is no longer retried
    /// automatically.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Backoff delay after `attempt` consecutive failures, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(base.min(self.max_delay.as_secs_f64())).unwrap_or(self.max_delay)
    }

    /// Backoff delay after `attempt` consecutive failures, with up to 25%
    /// jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.add_jitter && !delay.is_zero() {
            let jitter = delay.as_secs_f64() * 0.25 * rand::thread_rng().gen::<f64>();
            delay + Duration::from_secs_f64(jitter)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
