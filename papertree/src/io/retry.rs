//! Bounded exponential backoff for transient HTTP statuses.

use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Seconds; the wait before retry `n > 1` is `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,

    /// Upper bound on a single wait, in seconds.
    pub backoff_max: f64,

    /// Statuses that trigger a retry. Anything else fails immediately.
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 100,
            backoff_factor: 1.0,
            backoff_max: 120.0,
            status_forcelist: vec![500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Same statuses and budget, no waiting.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_factor: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(anyhow!("retry.backoff_factor must be >= 0"));
        }
        if !self.backoff_max.is_finite() || self.backoff_max < 0.0 {
            return Err(anyhow!("retry.backoff_max must be >= 0"));
        }
        Ok(())
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Wait before the `retry`-th retry (1-based). The first retry is immediate.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = (self.backoff_factor * 2f64.powi(exponent)).min(self.backoff_max);
        Duration::from_secs_f64(secs.max(0.0))
    }
}
