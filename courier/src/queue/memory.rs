//! Provides an in memory implementation of [`Queue`].
//!
//! Jobs held by a [`MemoryQueue`] only live as long as the process, use a broker backed queue
//! when jobs need to survive a restart.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Queue, QueueError};
use crate::job::Job;

/// A fixed capacity FIFO buffer shared between all the workers of a dispatcher.
///
/// [`Queue::push`] never waits: once `capacity` jobs are waiting it fails with
/// [`QueueError::Full`]. [`Queue::pop`] waits cooperatively until a job arrives or the
/// cancellation token fires.
#[derive(Debug)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    available: Notify,
    closed: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl MemoryQueue {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn try_pop(&self) -> Result<Option<Job>, QueueError> {
        self.ensure_open()?;
        Ok(self.lock()?.pop_front())
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Job>>, QueueError> {
        self.jobs.lock().map_err(|_| QueueError::BadState)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        self.ensure_open()?;
        {
            let mut jobs = self.lock()?;
            if jobs.len() >= self.capacity {
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    async fn pop(&self, cancellation: &CancellationToken) -> Result<Job, QueueError> {
        loop {
            if cancellation.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            // Register interest before looking so a push in between is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_pop()? {
                return Ok(job);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancellation.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.lock()?.clear();
        }
        self.available.notify_waiters();
        Ok(())
    }

    async fn size(&self) -> Result<Option<usize>, QueueError> {
        Ok(Some(self.lock()?.len()))
    }
}
