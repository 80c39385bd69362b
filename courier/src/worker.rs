use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::{
    deliver::{Deliver, DeliveryError},
    job::Job,
    queue::{Queue, QueueError},
    scheduler::RetryScheduler,
};

/// How long a worker waits before popping again after a transient queue error.
const POP_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// A single loop pulling jobs from the shared queue and delivering them.
pub(crate) struct Worker<Q, D> {
    id: usize,
    queue: Arc<Q>,
    deliverer: Arc<D>,
    scheduler: RetryScheduler<Q>,
    shutdown: CancellationToken,
    delivery_timeout: Option<Duration>,
}

impl<Q, D> Worker<Q, D>
where
    Q: Queue + 'static,
    D: Deliver + 'static,
{
    pub(crate) fn new(
        id: usize,
        queue: Arc<Q>,
        deliverer: Arc<D>,
        scheduler: RetryScheduler<Q>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            deliverer,
            scheduler,
            shutdown,
            delivery_timeout: None,
        }
    }

    pub(crate) fn with_delivery_timeout(self, delivery_timeout: Option<Duration>) -> Self {
        Self {
            delivery_timeout,
            ..self
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run().in_current_span())
    }

    async fn run(self) {
        tracing::debug!(worker = self.id, "Worker {} started", self.id);
        loop {
            let job = match self.queue.pop(&self.shutdown).await {
                Ok(job) => job,
                Err(QueueError::Cancelled) => break,
                Err(QueueError::Closed) => {
                    tracing::debug!(worker = self.id, "Queue closed");
                    break;
                }
                Err(error) => {
                    if error.is_transient() {
                        tracing::debug!(worker = self.id, %error, "No job available: {error}");
                    } else {
                        tracing::warn!(worker = self.id, %error, "Failed to pop job: {error}");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(POP_RETRY_PAUSE) => continue,
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            };

            if self.scheduler.policy().is_ready_for_retry(&job) {
                self.execute(job).await;
            } else {
                self.delay(job);
            }
        }
        tracing::debug!(worker = self.id, "Shutting down worker {}", self.id);
    }

    /// Hand a job that is not yet due back to the queue once it is, keeping this worker free for
    /// other jobs in the meantime.
    fn delay(&self, job: Job) {
        let delay = (job.next_retry_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tracing::debug!(
            worker = self.id,
            destination = %job.destination,
            ?delay,
            "Job for {} not ready for retry, delaying",
            job.destination,
        );
        self.scheduler.requeue_after(job, delay);
    }

    #[instrument(skip_all, fields(worker = self.id, destination = %job.destination))]
    async fn execute(&self, job: Job) {
        let started = tokio::time::Instant::now();
        tracing::info!(
            retry_info = %self.scheduler.policy().retry_info(&job),
            created_at = %job.created_at,
            "Delivering job for {}",
            job.destination,
        );

        let result = self.deliver(&job).await;
        let duration = started.elapsed();

        match result {
            Ok(()) => tracing::info!(?duration, "Delivered job for {}", job.destination),
            Err(error) => {
                tracing::warn!(?duration, %error, "Failed to deliver job for {}", job.destination);
                self.scheduler.schedule_retry(job, error);
            }
        }
    }

    /// Run the delivery on its own task so that a panic is reported as a failed attempt instead
    /// of taking down the worker.
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        let deliverer = self.deliverer.clone();
        let destination = job.destination.clone();
        let payload = job.payload.clone();
        let timeout = self.delivery_timeout;

        let delivery = async move {
            match timeout {
                Some(timeout) => {
                    tokio::time::timeout(timeout, deliverer.deliver(&destination, &payload))
                        .await
                        .map_err(|_elapsed| DeliveryError::from(timeout))?
                }
                None => deliverer.deliver(&destination, &payload).await,
            }
        };

        tokio::spawn(delivery.in_current_span()).await?
    }
}
