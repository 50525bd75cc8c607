// Copyright 2020 Joyent, Inc.

use std::thread;
use std::time::Duration;

use crate::error::Error;

/// The default number of total attempts made by `LimitedRetry`.
pub const DEFAULT_RETRY_LIMIT: u32 = 10;

/// The retry policy seam: decides how many times, and with what spacing, a
/// whole operation is re-run after it fails. The driver uses this to wrap
/// entire selection passes, so one retry here may itself span several
/// endpoint failovers.
pub trait RetryPolicy: Send + Sync {
    /// Run `op` until it succeeds or the policy gives up, in which case the
    /// last error is propagated to the caller.
    fn with_retry<T, F>(&self, op: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>;
}

/// Delay schedule between the attempts of a `LimitedRetry` policy.
#[derive(Clone, Debug)]
pub enum BackoffStrategy {
    /// Re-run immediately.
    None,
    /// Fixed delay between attempts.
    Fixed {
        delay: Duration,
    },
    /// Exponentially growing delay, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// The delay to sleep after the failed attempt with the given zero-based
    /// index, or `None` for no delay.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            BackoffStrategy::None => None,
            BackoffStrategy::Fixed { delay } => Some(*delay),
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let delay_ms =
                    initial.as_millis() as f64 * multiplier.powi(attempt as i32);
                let delay = Duration::from_millis(delay_ms as u64);
                Some(delay.min(*max))
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::None
    }
}

/// The default retry policy: a bounded number of attempts with an optional
/// delay between them. The limit counts total attempts, so a policy with a
/// limit of 3 runs the operation at most 3 times before surfacing the last
/// error.
#[derive(Clone, Debug)]
pub struct LimitedRetry {
    limit: u32,
    backoff: BackoffStrategy,
}

impl LimitedRetry {
    /// Create a policy that attempts up to `limit` times with no delay
    /// between attempts. A limit of zero is treated as one.
    pub fn new(limit: u32) -> Self {
        LimitedRetry {
            limit: limit.max(1),
            backoff: BackoffStrategy::None,
        }
    }

    /// Create a policy that attempts up to `limit` times, sleeping according
    /// to `backoff` between attempts.
    pub fn with_backoff(limit: u32, backoff: BackoffStrategy) -> Self {
        LimitedRetry {
            limit: limit.max(1),
            backoff,
        }
    }

    /// The total attempt bound of the policy.
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for LimitedRetry {
    fn default() -> Self {
        LimitedRetry::new(DEFAULT_RETRY_LIMIT)
    }
}

impl RetryPolicy for LimitedRetry {
    fn with_retry<T, F>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.limit {
                        return Err(err);
                    }
                    if let Some(delay) = self.backoff.delay(attempt - 1) {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}
