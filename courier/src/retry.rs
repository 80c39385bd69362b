//! Retry eligibility and exponential backoff for failed jobs.
//!
//! A [`RetryPolicy`] is pure configuration. It decides whether a failed job may be attempted
//! again and, if so, how long to wait first:
//!
//! ```text
//! delay(retry_count) = min(base_delay * backoff_multiplier ^ retry_count, max_delay)
//! ```
//!
//! optionally perturbed by a random jitter of up to ±10%.
//!
//! # Example
//!
//! ```
//! # use courier::retry::RetryPolicy;
//! # use std::time::Duration;
//! let policy = RetryPolicy::default()
//!     .with_base_delay(Duration::from_secs(1))
//!     .with_max_delay(Duration::from_secs(5))
//!     .without_jitter();
//!
//! assert_eq!(policy.next_delay(0), Duration::from_secs(1));
//! assert_eq!(policy.next_delay(1), Duration::from_secs(2));
//! assert_eq!(policy.next_delay(2), Duration::from_secs(4));
//! assert_eq!(policy.next_delay(3), Duration::from_secs(5));
//! ```
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::job::{builder::JobBuilder, Job};

/// The proportion of a delay by which jitter may move it in either direction.
const JITTER_RATIO: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// The number of retries given to jobs created through [`RetryPolicy::new_job`].
    pub max_retries: u32,
    /// The delay before the first retry.
    pub base_delay: Duration,
    /// No delay, before jitter, exceeds this.
    pub max_delay: Duration,
    /// The growth factor applied per retry. Values below `1.0` are treated as `1.0`.
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    pub fn with_max_delay(self, max_delay: Duration) -> Self {
        Self { max_delay, ..self }
    }

    pub fn with_backoff_multiplier(self, backoff_multiplier: f64) -> Self {
        Self {
            backoff_multiplier,
            ..self
        }
    }

    pub fn with_jitter(self) -> Self {
        Self {
            jitter_enabled: true,
            ..self
        }
    }

    pub fn without_jitter(self) -> Self {
        Self {
            jitter_enabled: false,
            ..self
        }
    }

    /// Whether the job has retries left.
    pub fn should_retry(&self, job: &Job) -> bool {
        job.retry_count < job.max_retries
    }

    /// The delay to wait before retrying a job that has already been retried `retry_count`
    /// times.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        // Overflow saturates to inf, which is clamped here.
        let delay = delay.min(max);

        let delay = if self.jitter_enabled {
            apply_jitter(delay)
        } else {
            delay
        };

        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Record a failed attempt on the job and push back its next permitted execution time.
    ///
    /// The delay is based on the retry count before the increment, so the first retry waits
    /// [`RetryPolicy::next_delay`]`(0)`.
    pub fn prepare_retry(&self, mut job: Job, error: impl ToString) -> Job {
        let delay = self.next_delay(job.retry_count);
        job.retry_count += 1;
        job.last_error = error.to_string();
        let next_retry_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        job.next_retry_at = job.next_retry_at.max(next_retry_at);
        job
    }

    /// Whether the job may be executed now.
    pub fn is_ready_for_retry(&self, job: &Job) -> bool {
        Utc::now() >= job.next_retry_at
    }

    /// A human readable description of where the job is in its retry budget.
    pub fn retry_info(&self, job: &Job) -> String {
        if job.retry_count == 0 {
            return "First attempt".to_owned();
        }
        let until_retry = job.next_retry_at - Utc::now();
        if until_retry <= TimeDelta::zero() {
            format!("Retry {}/{} (Ready)", job.retry_count, job.max_retries)
        } else {
            format!(
                "Retry {}/{} (Next retry in {}s)",
                job.retry_count,
                job.max_retries,
                until_retry.num_seconds()
            )
        }
    }

    /// Build a job whose retry budget is taken from this policy.
    pub fn new_job(
        &self,
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Job {
        self.job_builder(destination)
            .with_subject(subject)
            .with_body(body)
            .build()
    }

    /// A [`JobBuilder`] preconfigured with this policy's retry budget.
    pub fn job_builder(&self, destination: impl Into<String>) -> JobBuilder {
        Job::builder(destination).with_max_retries(self.max_retries)
    }
}

fn apply_jitter(delay: f64) -> f64 {
    let jitter = delay * JITTER_RATIO;
    if jitter <= 0.0 || !jitter.is_finite() {
        return delay;
    }
    delay + rand::thread_rng().gen_range(-jitter..=jitter)
}
