//! An asynchronous job dispatcher with pluggable queues and exponential backoff retries.
//!
//! Jobs are [submitted](Dispatcher::submit) to a [`Queue`](queue::Queue) and picked up by a pool
//! of workers which hand each one to a [`Deliver`](deliver::Deliver) implementation. Failed
//! deliveries are retried according to a [`RetryPolicy`](retry::RetryPolicy) until the job's
//! retry budget is exhausted.
//!
//! # Example
//!
//! ```
//! use courier::prelude::*;
//!
//! struct Stdout;
//!
//! #[async_trait::async_trait]
//! impl Deliver for Stdout {
//!     async fn deliver(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
//!         println!("{destination}: {}", payload.subject);
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let mut dispatcher = Dispatcher::new(MemoryQueue::default(), Stdout);
//! dispatcher.start(4).unwrap();
//!
//! let job = Job::builder("someone@example.com")
//!     .with_subject("Hello")
//!     .build();
//! dispatcher.submit(job).await.unwrap();
//!
//! dispatcher.graceful_shutdown().await.unwrap();
//! # }
//! ```
use std::{sync::Arc, time::Duration};

pub mod config;
pub mod deliver;
pub mod job;
pub mod prelude;
pub mod queue;
pub mod retry;
mod scheduler;
mod worker;

use config::DispatcherConfig;
use deliver::{Deliver, DeliveryError};
use job::Job;
use queue::{Queue, QueueError};
use retry::RetryPolicy;
use scheduler::RetryScheduler;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use worker::Worker;

/// Owns a queue, a retry policy and the pool of workers draining the queue.
pub struct Dispatcher<Q, D> {
    queue: Arc<Q>,
    deliverer: Arc<D>,
    policy: Arc<RetryPolicy>,
    delivery_timeout: Option<Duration>,
    shutdown: CancellationToken,
    workers: Option<Vec<JoinHandle<()>>>,
}

impl<Q, D> Dispatcher<Q, D>
where
    Q: Queue + 'static,
    D: Deliver + 'static,
{
    pub fn new(queue: Q, deliverer: D) -> Self {
        Self {
            queue: Arc::new(queue),
            deliverer: Arc::new(deliverer),
            policy: Default::default(),
            delivery_timeout: None,
            shutdown: CancellationToken::new(),
            workers: None,
        }
    }

    /// Create a dispatcher with the retry policy and delivery timeout from `config`.
    ///
    /// The number of workers is not applied until [`Dispatcher::start`] is called with
    /// [`DispatcherConfig::workers`].
    pub fn from_config(queue: Q, deliverer: D, config: &DispatcherConfig) -> Self {
        let dispatcher = Self::new(queue, deliverer).with_retry_policy(config.retry.clone());
        match config.delivery_timeout {
            Some(timeout) => dispatcher.with_delivery_timeout(timeout),
            None => dispatcher,
        }
    }

    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            ..self
        }
    }

    /// Limit how long a single delivery may run before it is counted as a failed attempt.
    pub fn with_delivery_timeout(self, timeout: Duration) -> Self {
        Self {
            delivery_timeout: Some(timeout),
            ..self
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Spawn `worker_count` workers draining the queue.
    ///
    /// Must be called from within a tokio runtime. A dispatcher can only be started once.
    pub fn start(&mut self, worker_count: usize) -> Result<(), CourierError> {
        if self.workers.is_some() {
            return Err(CourierError::AlreadyStarted);
        }
        if worker_count == 0 {
            tracing::warn!("Starting dispatcher without workers, submitted jobs will not be delivered");
        }
        tracing::info!(workers = worker_count, "Starting {worker_count} workers");

        let workers = (0..worker_count)
            .map(|id| {
                Worker::new(
                    id,
                    self.queue.clone(),
                    self.deliverer.clone(),
                    self.scheduler(),
                    self.shutdown.clone(),
                )
                .with_delivery_timeout(self.delivery_timeout)
                .spawn()
            })
            .collect();
        self.workers = Some(workers);
        Ok(())
    }

    /// Enqueue a job for delivery.
    ///
    /// Errors from the queue, such as it being full, are returned unchanged.
    pub async fn submit(&self, job: Job) -> Result<(), QueueError> {
        let destination = job.destination.clone();
        self.queue.push(job).await.inspect_err(|error| {
            tracing::debug!(%destination, %error, "Failed to submit job for {destination}: {error}");
        })
    }

    /// Decide the fate of a job whose delivery failed.
    ///
    /// A job with retries left is re-enqueued once its backoff has elapsed, otherwise it is
    /// dropped. Either way this returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_retry(&self, job: Job, error: DeliveryError) {
        self.scheduler().schedule_retry(job, error);
    }

    /// The number of jobs waiting in the queue, if the queue can report it.
    pub async fn size(&self) -> Result<Option<usize>, QueueError> {
        self.queue.size().await
    }

    /// Signal the workers to stop and close the queue.
    ///
    /// Returns without waiting for deliveries already in progress. Pending retries are abandoned.
    pub async fn stop(&self) -> Result<(), QueueError> {
        tracing::debug!("Stopping dispatcher");
        self.shutdown.cancel();
        self.queue.close().await
    }

    /// Stop the dispatcher and wait for every worker to finish its current delivery.
    pub async fn graceful_shutdown(mut self) -> Result<(), CourierError> {
        self.stop().await?;
        tracing::debug!("Waiting for workers to shut down");
        futures::future::join_all(self.workers.take().unwrap_or_default())
            .await
            .into_iter()
            .map(|result| result.map_err(|_| CourierError::GracefulShutdownFailed))
            .collect()
    }

    fn scheduler(&self) -> RetryScheduler<Q> {
        RetryScheduler::new(
            self.queue.clone(),
            self.policy.clone(),
            self.shutdown.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("The dispatcher has already been started")]
    AlreadyStarted,
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("Error communicating with the queue")]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::{deliver::MockDeliver, job::Payload, queue::memory::MemoryQueue};

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Condition was not met in time");
    }

    fn job(destination: &str) -> Job {
        Job::builder(destination).with_subject("subject").build()
    }

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    impl Counter {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    struct Succeeding(Arc<Counter>);

    #[async_trait]
    impl Deliver for Succeeding {
        async fn deliver(&self, _: &str, _: &Payload) -> Result<(), DeliveryError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing(Arc<Counter>);

    #[async_trait]
    impl Deliver for Failing {
        async fn deliver(&self, _: &str, _: &Payload) -> Result<(), DeliveryError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::new("mailbox unavailable"))
        }
    }

    struct Sleeping(Arc<Counter>);

    #[async_trait]
    impl Deliver for Sleeping {
        async fn deliver(&self, _: &str, _: &Payload) -> Result<(), DeliveryError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn drains_queue_with_two_workers() {
        let counter = Arc::new(Counter::default());
        let mut dispatcher = Dispatcher::new(MemoryQueue::new(10), Succeeding(counter.clone()));

        for i in 0..10 {
            dispatcher.submit(job(&format!("{i}@example.com"))).await.unwrap();
        }
        dispatcher.start(2).unwrap();
        eventually(|| counter.calls() == 10).await;

        assert_eq!(dispatcher.size().await.unwrap(), Some(0));
        dispatcher.graceful_shutdown().await.unwrap();
        logs_assert(|lines: &[&str]| {
            match lines.iter().find(|line| line.contains("ERROR")) {
                Some(line) => Err(format!("Unexpected error log: {line}")),
                None => Ok(()),
            }
        });
    }

    /// Shares a [`MemoryQueue`] but leaves it open, and its jobs in place, when closed.
    struct KeepOpen(Arc<MemoryQueue>);

    #[async_trait]
    impl Queue for KeepOpen {
        async fn push(&self, job: Job) -> Result<(), QueueError> {
            self.0.push(job).await
        }
        async fn pop(&self, cancellation: &CancellationToken) -> Result<Job, QueueError> {
            self.0.pop(cancellation).await
        }
        async fn close(&self) -> Result<(), QueueError> {
            Ok(())
        }
        async fn size(&self) -> Result<Option<usize>, QueueError> {
            self.0.size().await
        }
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_in_flight_delivery() {
        let counter = Arc::new(Counter::default());
        let queue = Arc::new(MemoryQueue::new(10));
        let mut dispatcher = Dispatcher::new(KeepOpen(queue.clone()), Sleeping(counter.clone()));
        dispatcher.start(2).unwrap();

        dispatcher.submit(job("first@example.com")).await.unwrap();
        eventually(|| counter.calls() == 1).await;

        tokio::time::timeout(Duration::from_millis(100), dispatcher.stop())
            .await
            .expect("Stop blocked on the in-flight delivery")
            .unwrap();
        queue.push(job("second@example.com")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.calls(), 1);
        assert_eq!(queue.size().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let mut dispatcher = Dispatcher::new(MemoryQueue::new(10), MockDeliver::new());
        dispatcher.start(1).unwrap();

        dispatcher.stop().await.unwrap();

        assert_matches!(
            dispatcher.submit(job("late@example.com")).await,
            Err(QueueError::Closed)
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn drops_job_after_retries_are_exhausted() {
        let counter = Arc::new(Counter::default());
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(10))
            .without_jitter();
        let mut dispatcher =
            Dispatcher::new(MemoryQueue::new(10), Failing(counter.clone())).with_retry_policy(policy);
        dispatcher.start(2).unwrap();

        let job = dispatcher
            .retry_policy()
            .new_job("to@example.com", "subject", "body");
        dispatcher.submit(job).await.unwrap();
        eventually(|| logs_contain("failed permanently")).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.calls(), 4);
        assert_eq!(dispatcher.size().await.unwrap(), Some(0));
        dispatcher.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn submit_to_full_queue_fails_fast() {
        let dispatcher = Dispatcher::new(MemoryQueue::new(1), MockDeliver::new());

        dispatcher.submit(job("one@example.com")).await.unwrap();
        let result = dispatcher.submit(job("two@example.com")).await;

        assert_matches!(result, Err(QueueError::Full { capacity: 1 }));
    }

    #[tokio::test]
    async fn start_twice() {
        let mut dispatcher = Dispatcher::new(MemoryQueue::default(), MockDeliver::new());

        dispatcher.start(1).unwrap();

        assert_matches!(dispatcher.start(1), Err(CourierError::AlreadyStarted));
        dispatcher.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn schedule_retry_requeues_job() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(10))
            .without_jitter();
        let dispatcher =
            Dispatcher::new(MemoryQueue::default(), MockDeliver::new()).with_retry_policy(policy);

        dispatcher.schedule_retry(job("to@example.com"), DeliveryError::new("refused"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(dispatcher.size().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn graceful_shutdown_without_start() {
        let dispatcher = Dispatcher::new(MemoryQueue::default(), MockDeliver::new());

        dispatcher.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dispatcher_over_boxed_queue() {
        let counter = Arc::new(Counter::default());
        let queue: Box<dyn Queue> = Box::new(MemoryQueue::default());
        let config = DispatcherConfig {
            workers: 3,
            delivery_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::from_config(queue, Succeeding(counter.clone()), &config);
        dispatcher.start(config.workers).unwrap();

        dispatcher.submit(job("to@example.com")).await.unwrap();
        eventually(|| counter.calls() == 1).await;

        dispatcher.graceful_shutdown().await.unwrap();
    }
}
