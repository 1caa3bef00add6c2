//! Per-record retry decisions.

use crate::config::RetryConfig;
use crate::error::GatewayError;
use roost_core::{FailureKind, SyncableRecord, Timestamp};

/// What a pass should do with one unsynced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// Push it now.
    Attempt,
    /// Leave it for an operator; it is not retried automatically.
    Skip,
    /// Its backoff window has not elapsed yet.
    Defer {
        /// Earliest time of the next attempt.
        until: Timestamp,
    },
}

/// Attempt counting, cap and pacing for record pushes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry: RetryConfig,
    record_pacing: bool,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(retry: RetryConfig, record_pacing: bool) -> Self {
        Self {
            retry,
            record_pacing,
        }
    }

    /// Consecutive failures after which a record is exhausted.
    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts
    }

    /// The retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Decides whether to push `record` at `now`.
    pub fn decide<T>(&self, record: &SyncableRecord<T>, now: Timestamp) -> AttemptDecision {
        match record.failure_kind() {
            None => AttemptDecision::Attempt,
            Some(FailureKind::Terminal | FailureKind::Exhausted) => AttemptDecision::Skip,
            Some(FailureKind::Retryable) if record.sync_attempts() >= self.max_attempts() => {
                AttemptDecision::Skip
            }
            Some(FailureKind::Retryable) => match record.last_attempt_at() {
                Some(last) if self.record_pacing => {
                    let until = last.saturating_add(self.retry.base_delay(record.sync_attempts()));
                    if now < until {
                        AttemptDecision::Defer { until }
                    } else {
                        AttemptDecision::Attempt
                    }
                }
                _ => AttemptDecision::Attempt,
            },
        }
    }

    /// Returns true if a push failing with `error` should be retried.
    pub fn is_retryable(error: &GatewayError) -> bool {
        error.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default(), false)
    }
}
