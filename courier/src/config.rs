//! Configuration for a [`crate::Dispatcher`].
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// The number of workers started when no other value is configured.
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How many workers to pass to [`crate::Dispatcher::start`].
    pub workers: usize,
    pub retry: RetryPolicy,
    /// An upper bound on a single delivery attempt. Unbounded when absent.
    pub delivery_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            delivery_timeout: None,
        }
    }
}
