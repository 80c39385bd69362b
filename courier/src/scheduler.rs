use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::{deliver::DeliveryError, job::Job, queue::Queue, retry::RetryPolicy};

/// The single authority deciding what happens to a job after a failed attempt.
///
/// Owned by the [`crate::Dispatcher`]; every worker holds a clone.
pub(crate) struct RetryScheduler<Q> {
    queue: Arc<Q>,
    policy: Arc<RetryPolicy>,
    shutdown: CancellationToken,
}

impl<Q> Clone for RetryScheduler<Q> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            policy: self.policy.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<Q> RetryScheduler<Q>
where
    Q: Queue + 'static,
{
    pub(crate) fn new(queue: Arc<Q>, policy: Arc<RetryPolicy>, shutdown: CancellationToken) -> Self {
        Self {
            queue,
            policy,
            shutdown,
        }
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Either drop the job as permanently failed, or record the failure and arrange for the job
    /// to be pushed back onto the queue once its backoff has elapsed.
    #[instrument(skip_all, fields(destination = %job.destination))]
    pub(crate) fn schedule_retry(&self, job: Job, error: DeliveryError) {
        if !self.policy.should_retry(&job) {
            tracing::error!(
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                %error,
                "Job for {} failed permanently and will be discarded",
                job.destination,
            );
            return;
        }

        let job = self.policy.prepare_retry(job, &error);
        let delay = (job.next_retry_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        tracing::warn!(
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            ?delay,
            %error,
            "Job for {} failed and will be retried in {delay:?}",
            job.destination,
        );
        self.requeue_after(job, delay);
    }

    /// Push `job` back onto the queue once `delay` has elapsed, without blocking the caller.
    ///
    /// The push happens exactly once. If it fails, or shutdown is signalled first, the job is
    /// dropped.
    pub(crate) fn requeue_after(&self, job: Job, delay: Duration) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let requeue = async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    tracing::warn!(
                        destination = %job.destination,
                        retry_count = job.retry_count,
                        "Shutting down, dropping job for {} awaiting requeue",
                        job.destination,
                    );
                    return;
                }
            }
            let destination = job.destination.clone();
            let retry_count = job.retry_count;
            match queue.push(job).await {
                Ok(()) => tracing::debug!(%destination, retry_count, "Requeued job for {destination}"),
                Err(error) => tracing::error!(
                    %destination,
                    retry_count,
                    %error,
                    "Failed to requeue job for {destination}, it will be discarded: {error}"
                ),
            }
        };
        tokio::spawn(requeue.in_current_span());
    }
}
