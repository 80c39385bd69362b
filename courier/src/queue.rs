//! The pluggable queue jobs are pushed to and popped from.
//!
//! Every backend implements [`Queue`]. The in-process [`memory::MemoryQueue`] is the reference
//! implementation; broker backed implementations live in their own crates and are expected to
//! behave the same from the caller's point of view, which can be checked by running the
//! [`queue_test_suite!`](crate::queue_test_suite) against them.
use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::Job;

pub mod memory;
pub mod testing;

/// A FIFO (best effort) queue of [`Job`]s, safe for use by many concurrent callers.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Add a job to the queue.
    ///
    /// The queue does not interpret any of the job's timing fields.
    ///
    /// Bounded backends fail fast with [`QueueError::Full`] rather than waiting for space.
    async fn push(&self, job: Job) -> Result<(), QueueError>;

    /// Remove and return the next job.
    ///
    /// Waits until a job is available or `cancellation` fires, in which case
    /// [`QueueError::Cancelled`] is returned. Broker backends bound the wait and return
    /// [`QueueError::Timeout`] when nothing arrived, which callers should treat as "try again".
    async fn pop(&self, cancellation: &CancellationToken) -> Result<Job, QueueError>;

    /// Release the resources held by the queue.
    ///
    /// Afterwards both [`Queue::push`] and [`Queue::pop`] return [`QueueError::Closed`].
    async fn close(&self) -> Result<(), QueueError>;

    /// The number of jobs waiting in the queue, or `None` if the backend can not report it.
    async fn size(&self) -> Result<Option<usize>, QueueError>;
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("Queue has been closed")]
    Closed,
    #[error("Timed out waiting for a job")]
    Timeout,
    #[error("Waiting for a job was cancelled")]
    Cancelled,
    #[error("Queue in bad state")]
    BadState,
    #[error("Error encoding or decoding job")]
    Codec(#[from] serde_json::Error),
    #[error("Error communicating with the queue backend: {0}")]
    Transport(#[source] Box<dyn Error + Send + Sync>),
}

impl QueueError {
    /// Wrap a backend specific error.
    pub fn transport(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(error))
    }

    /// Whether the failed operation can simply be tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

#[async_trait]
impl<Q> Queue for Box<Q>
where
    Q: Queue + ?Sized,
{
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        (**self).push(job).await
    }
    async fn pop(&self, cancellation: &CancellationToken) -> Result<Job, QueueError> {
        (**self).pop(cancellation).await
    }
    async fn close(&self) -> Result<(), QueueError> {
        (**self).close().await
    }
    async fn size(&self) -> Result<Option<usize>, QueueError> {
        (**self).size().await
    }
}

#[async_trait]
impl<Q> Queue for Arc<Q>
where
    Q: Queue + ?Sized,
{
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        (**self).push(job).await
    }
    async fn pop(&self, cancellation: &CancellationToken) -> Result<Job, QueueError> {
        (**self).pop(cancellation).await
    }
    async fn close(&self) -> Result<(), QueueError> {
        (**self).close().await
    }
    async fn size(&self) -> Result<Option<usize>, QueueError> {
        (**self).size().await
    }
}
